//! Template store: observed data and process templates per channel.

use crate::histogram::Histogram;
use std::collections::HashMap;
use xs_core::{Error, Result};

/// A named contribution to a channel's expected counts.
#[derive(Debug, Clone)]
pub struct Process {
    name: String,
    is_signal: bool,
    nominal: Histogram,
}

impl Process {
    /// Process name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `mu` scales this process.
    pub fn is_signal(&self) -> bool {
        self.is_signal
    }

    /// Nominal per-bin yields.
    pub fn nominal(&self) -> &Histogram {
        &self.nominal
    }
}

/// An analysis region: one data histogram plus process templates sharing its binning.
#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    data: Histogram,
    processes: Vec<Process>,
    process_index: HashMap<String, usize>,
}

impl Channel {
    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observed counts.
    pub fn data(&self) -> &Histogram {
        &self.data
    }

    /// Number of bins (the channel's binning contract).
    pub fn n_bins(&self) -> usize {
        self.data.n_bins()
    }

    /// Processes in registration order.
    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter()
    }

    /// Look up a process by name.
    pub fn process(&self, name: &str) -> Option<&Process> {
        self.process_index.get(name).map(|&i| &self.processes[i])
    }
}

/// Channels and their templates, in registration order.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    channels: Vec<Channel>,
    channel_index: HashMap<String, usize>,
    signal_label: String,
}

impl TemplateStore {
    /// Empty store whose signal label is `signal_label`.
    pub fn new(signal_label: impl Into<String>) -> Self {
        Self { channels: Vec::new(), channel_index: HashMap::new(), signal_label: signal_label.into() }
    }

    /// Register a channel with its observed-data histogram.
    pub fn add_channel(&mut self, name: &str, data: &Histogram) -> Result<()> {
        if self.channel_index.contains_key(name) {
            return Err(Error::Validation(format!("channel already exists: {name}")));
        }
        if data.n_bins() == 0 {
            return Err(Error::Validation(format!("add_channel({name}): data histogram is empty")));
        }
        self.channel_index.insert(name.to_string(), self.channels.len());
        self.channels.push(Channel {
            name: name.to_string(),
            data: data.clone(),
            processes: Vec::new(),
            process_index: HashMap::new(),
        });
        log::debug!("registered channel '{name}' ({})", data.binning());
        Ok(())
    }

    /// Register a process template under an existing channel.
    ///
    /// The stored flag is `is_signal || process == signal_label`.
    pub fn add_process(
        &mut self,
        channel: &str,
        process: &str,
        nominal: &Histogram,
        is_signal: bool,
    ) -> Result<()> {
        let signal_label = &self.signal_label;
        let ch = self
            .channel_index
            .get(channel)
            .map(|&i| &mut self.channels[i])
            .ok_or_else(|| Error::Validation(format!("add_process: unknown channel {channel}")))?;
        if nominal.n_bins() == 0 {
            return Err(Error::Validation(format!(
                "add_process({channel},{process}): nominal histogram is empty"
            )));
        }
        if ch.process_index.contains_key(process) {
            return Err(Error::Validation(format!(
                "add_process: process already exists in channel {channel}: {process}"
            )));
        }
        ch.data.ensure_same_binning(nominal, &format!("add_process({channel},{process})"))?;

        let is_signal = is_signal || process == signal_label;
        ch.process_index.insert(process.to_string(), ch.processes.len());
        ch.processes.push(Process { name: process.to_string(), is_signal, nominal: nominal.clone() });
        Ok(())
    }

    /// Re-designate the signal label and re-flag every process in every channel.
    pub fn mark_signal_process(&mut self, process: &str) {
        self.signal_label = process.to_string();
        for ch in &mut self.channels {
            for p in &mut ch.processes {
                p.is_signal = p.name == self.signal_label;
            }
        }
    }

    /// Current signal label.
    pub fn signal_label(&self) -> &str {
        &self.signal_label
    }

    /// Channels in registration order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channel_index.get(name).map(|&i| &self.channels[i])
    }

    /// Look up a registered (channel, process) template.
    pub fn process(&self, channel: &str, process: &str) -> Option<&Process> {
        self.channel(channel)?.process(process)
    }

    /// Whether (channel, process) is registered.
    pub fn has_process(&self, channel: &str, process: &str) -> bool {
        self.process(channel, process).is_some()
    }

    /// Whether any process in any channel is flagged as signal.
    pub fn has_signal(&self) -> bool {
        self.channels.iter().any(|ch| ch.processes.iter().any(|p| p.is_signal))
    }

    /// True if no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new("signal")
    }
}
