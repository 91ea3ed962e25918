//! In-memory dialer for driving the manager without a network

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::state::{LinkEnvelope, LinkEvent, LinkId};
use super::transport::{Dialer, LinkCommand, LinkHandle};

struct ScriptedLink {
    url: String,
    events: mpsc::Sender<LinkEnvelope>,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    received: Vec<LinkCommand>,
}

impl ScriptedLink {
    fn drain(&mut self) -> &[LinkCommand] {
        while let Ok(command) = self.commands.try_recv() {
            self.received.push(command);
        }
        &self.received
    }
}

/// Records every dial and lets tests inject link events by hand
#[derive(Clone, Default)]
pub struct ScriptedDialer {
    links: Arc<Mutex<BTreeMap<LinkId, ScriptedLink>>>,
}

impl ScriptedDialer {
    pub fn dial_count(&self) -> usize {
        self.links.lock().len()
    }

    pub fn dialed_urls(&self) -> Vec<String> {
        self.links.lock().values().map(|l| l.url.clone()).collect()
    }

    /// Everything the manager asked link `id` to do, in order
    pub fn commands(&self, id: LinkId) -> Vec<LinkCommand> {
        self.links
            .lock()
            .get_mut(&id)
            .map(|l| l.drain().to_vec())
            .unwrap_or_default()
    }

    /// Text frames written to link `id`
    pub fn sent(&self, id: LinkId) -> Vec<String> {
        self.commands(id)
            .into_iter()
            .filter_map(|c| match c {
                LinkCommand::Send(text) => Some(text),
                LinkCommand::Close => None,
            })
            .collect()
    }

    /// Deliver `event` as if link `id` produced it
    pub async fn emit(&self, id: LinkId, event: LinkEvent) {
        let events = self
            .links
            .lock()
            .get(&id)
            .map(|l| l.events.clone())
            .unwrap_or_else(|| panic!("link {} was never dialed", id));
        events
            .send(LinkEnvelope::new(id, event))
            .await
            .expect("manager dropped its event receiver");
    }
}

impl Dialer for ScriptedDialer {
    fn dial(&mut self, id: LinkId, url: &str, events: mpsc::Sender<LinkEnvelope>) -> LinkHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.links.lock().insert(
            id,
            ScriptedLink {
                url: url.to_string(),
                events,
                commands: command_rx,
                received: Vec::new(),
            },
        );
        LinkHandle::new(id, command_tx, None)
    }
}
