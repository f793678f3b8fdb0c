//! Active channel selection: which numeric variables reach the live buffer.
use crate::config::InstrumentConfig;
use crate::core::Record;

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSelection {
    /// Record index and name of every selectable channel, in record order.
    channels: Vec<(usize, String)>,
    active: Vec<bool>,
}

impl ChannelSelection {
    /// Every numeric variable, with the configured `active_channels` switched on
    /// (all of them when none are configured).
    pub fn for_config(cfg: &InstrumentConfig) -> Self {
        let channels: Vec<(usize, String)> = cfg
            .numeric_variables()
            .map(|(i, v)| (i, v.name.clone()))
            .collect();
        let active = channels
            .iter()
            .map(|(_, name)| match &cfg.active_channels {
                Some(selected) => selected.contains(name),
                None => true,
            })
            .collect();
        Self { channels, active }
    }

    /// Switch a channel on or off. Returns whether anything changed.
    pub fn set(&mut self, name: &str, on: bool) -> bool {
        match self.channels.iter().position(|(_, n)| n == name) {
            Some(i) if self.active[i] != on => {
                self.active[i] = on;
                true
            }
            _ => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|(_, n)| n.clone()).collect()
    }

    pub fn active_names(&self) -> Vec<String> {
        self.iter_active().map(|(_, n)| n.clone()).collect()
    }

    /// Values of the active channels, NaN for non-numeric or missing ones.
    pub fn pick(&self, record: &Record) -> Vec<f64> {
        self.iter_active()
            .map(|(i, _)| record.get(*i).and_then(|v| v.as_f64()).unwrap_or(f64::NAN))
            .collect()
    }

    fn iter_active(&self) -> impl Iterator<Item = &(usize, String)> {
        self.channels
            .iter()
            .zip(&self.active)
            .filter(|(_, on)| **on)
            .map(|(channel, _)| channel)
    }
}
