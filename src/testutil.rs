use crate::provider::{CounterId, CounterProvider, ProviderError, TargetKind};
use std::collections::HashMap;
use tokio::sync::watch;

enum Feed {
    Constant(f64),
    Queue(Vec<f64>),
}

/// Counter provider fed from the test: either a constant per counter or a
/// finite queue of readings. Reading past the end of a queue fails the way
/// an invalidated OS counter would.
pub struct ScriptedProvider {
    feeds: HashMap<CounterId, Feed>,
    pub reads: usize,
    volumes: Vec<String>,
    interfaces: Vec<String>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            feeds: HashMap::new(),
            reads: 0,
            volumes: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    pub fn constant(mut self, counter: CounterId, value: f64) -> Self {
        self.feeds.insert(counter, Feed::Constant(value));
        self
    }

    pub fn queue(mut self, counter: CounterId, values: Vec<f64>) -> Self {
        self.feeds.insert(counter, Feed::Queue(values));
        self
    }

    pub fn volumes(mut self, names: &[&str]) -> Self {
        self.volumes = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn interfaces(mut self, names: &[&str]) -> Self {
        self.interfaces = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

impl CounterProvider for ScriptedProvider {
    fn read_instantaneous(&mut self, counter: &CounterId) -> Result<f64, ProviderError> {
        self.reads += 1;
        match self.feeds.get_mut(counter) {
            Some(Feed::Constant(value)) => Ok(*value),
            Some(Feed::Queue(values)) => {
                if values.is_empty() {
                    Err(ProviderError::Probe("counter invalidated".to_string()))
                } else {
                    Ok(values.remove(0))
                }
            }
            None => Err(ProviderError::MissingTarget(counter.to_string())),
        }
    }

    fn list_targets(&mut self, kind: TargetKind) -> Result<Vec<String>, ProviderError> {
        match kind {
            TargetKind::Volume => Ok(self.volumes.clone()),
            TargetKind::NetworkInterface => Ok(self.interfaces.clone()),
        }
    }
}

pub fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}
