//! Routing tables owned by the relay coordinator.

use std::collections::HashMap;

use mcp_bridge_core::{BridgeMessage, BridgeResponse, ClientId, TabId};
use tokio::sync::mpsc;

/// Routing state for one relay coordinator.
///
/// All mutation happens from the coordinator's own event loop; none of the
/// methods suspend, so no caller can observe a half-updated table.
#[derive(Default)]
pub struct RelayState {
    /// Singleton channel to the UI surface; replaced on every new UI
    /// connection, implicitly invalidating the previous one.
    ui: Option<mpsc::UnboundedSender<BridgeResponse>>,
    /// One channel per tab with an active content-side relay.
    content: HashMap<TabId, mpsc::UnboundedSender<BridgeMessage>>,
    /// Pinned routing decision per logical client.
    client_tabs: HashMap<ClientId, TabId>,
}

impl RelayState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the UI channel.
    pub fn set_ui_port(&mut self, tx: mpsc::UnboundedSender<BridgeResponse>) {
        self.ui = Some(tx);
    }

    /// Channel to the UI, if one is connected.
    #[must_use]
    pub fn ui_sender(&self) -> Option<&mpsc::UnboundedSender<BridgeResponse>> {
        self.ui.as_ref()
    }

    /// Register a content channel for `tab`.
    pub fn register_content(&mut self, tab: TabId, tx: mpsc::UnboundedSender<BridgeMessage>) {
        self.content.insert(tab, tx);
    }

    /// Remove the content channel for `tab` and purge every client pinned
    /// to it. Returns the purged client ids.
    pub fn remove_content(&mut self, tab: TabId) -> Vec<ClientId> {
        self.content.remove(&tab);
        let purged: Vec<ClientId> = self
            .client_tabs
            .iter()
            .filter(|(_, t)| **t == tab)
            .map(|(c, _)| c.clone())
            .collect();
        for client in &purged {
            self.client_tabs.remove(client);
        }
        purged
    }

    /// Channel to `tab`, if it has an active content relay.
    #[must_use]
    pub fn content_sender(&self, tab: TabId) -> Option<&mpsc::UnboundedSender<BridgeMessage>> {
        self.content.get(&tab)
    }

    /// Pin `client` to a destination tab, if not already pinned.
    ///
    /// Target selection is "first available": the lowest registered tab id,
    /// which makes the arbitrary policy at least deterministic. Returns
    /// `None` when no content channel exists.
    pub fn pin(&mut self, client: &ClientId) -> Option<TabId> {
        if let Some(tab) = self.client_tabs.get(client) {
            if self.content.contains_key(tab) {
                return Some(*tab);
            }
            self.client_tabs.remove(client);
        }

        let tab = self.content.keys().min().copied()?;
        self.client_tabs.insert(client.clone(), tab);
        Some(tab)
    }

    /// The tab `client` is pinned to, if any.
    #[must_use]
    pub fn pinned_tab(&self, client: &ClientId) -> Option<TabId> {
        self.client_tabs.get(client).copied()
    }

    /// Drop the pin for `client`.
    pub fn unpin(&mut self, client: &ClientId) {
        self.client_tabs.remove(client);
    }

    /// Stale-route guard: a response from `from_tab` for `client` may be
    /// forwarded to the UI only when it matches the pinned tab.
    #[must_use]
    pub fn accepts_response(&self, client: &ClientId, from_tab: TabId) -> bool {
        self.pinned_tab(client) == Some(from_tab)
    }
}
