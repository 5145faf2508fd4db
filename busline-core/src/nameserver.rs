//! Name-resolution client (spec §4.8): a singleton per context thread
//! that itself behaves like a client endpoint talking to the name-server
//! service over the bus's own request/subscribe machinery.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::url::BusUrl;

/// Name-server API surface used by the core (spec §6), represented as
/// plain data the transport-level RPC glue serializes; the wire encoding
/// of these payloads is a serializer-plugin concern outside the core
/// (spec §1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceAddressList {
    pub service_name: String,
    pub host_name: String,
    pub is_local: bool,
    pub address_list: Vec<BusUrl>,
    pub token_list: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameServerCode {
    AllocServiceAddress = 1,
    RegisterService = 2,
    UnregisterService = 3,
    ServiceOnline = 4,
    MoreAddress = 5,
    HostInfo = 6,
}

pub type ServiceOnlineListener = Box<dyn Fn(&ServiceAddressList) + Send + Sync>;

struct Registration {
    bound: Vec<BusUrl>,
}

/// Client-side bookkeeping for name resolution. The actual RPC/subscribe
/// traffic to the name server rides the same `Endpoint`/`Session`
/// machinery as any other service; this type owns only the reconnect and
/// re-registration policy described in spec §4.8.
#[derive(Default)]
pub struct NameResolutionClient {
    registrations: Mutex<HashMap<String, Registration>>,
    online_listeners: Mutex<HashMap<String, Vec<ServiceOnlineListener>>>,
    connected: std::sync::atomic::AtomicBool,
}

impl NameResolutionClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, std::sync::atomic::Ordering::Release);
    }

    /// `Draining -> Dead` on the name-server session: connection state
    /// flips, but registrations and subscriptions are retained so
    /// reconnect can walk and re-establish them (spec §4.8).
    pub fn mark_disconnected(&self) {
        self.connected.store(false, std::sync::atomic::Ordering::Release);
    }

    pub fn record_registration(&self, service_name: impl Into<String>, bound: Vec<BusUrl>) {
        self.registrations
            .lock()
            .insert(service_name.into(), Registration { bound });
    }

    pub fn forget_registration(&self, service_name: &str) {
        self.registrations.lock().remove(service_name);
    }

    /// URLs previously bound for `service_name`, re-walked on reconnect to
    /// drive re-registration (spec §4.8).
    pub fn bound_addresses(&self, service_name: &str) -> Vec<BusUrl> {
        self.registrations
            .lock()
            .get(service_name)
            .map(|r| r.bound.clone())
            .unwrap_or_default()
    }

    pub fn subscribe_service_online(
        &self,
        service_name: impl Into<String>,
        listener: ServiceOnlineListener,
    ) {
        self.online_listeners
            .lock()
            .entry(service_name.into())
            .or_default()
            .push(listener);
    }

    /// Delivers a `ServiceOnline`/`MoreAddress` notification to every
    /// listener registered for `update.service_name`. An empty address
    /// list means the service went offline (spec §4.8).
    pub fn dispatch_online(&self, update: &ServiceAddressList) {
        if let Some(listeners) = self.online_listeners.lock().get(&update.service_name) {
            for listener in listeners {
                listener(update);
            }
        }
    }

    /// Walks every registration and subscription to re-establish them
    /// after a reconnect (spec §4.8's "on reconnect all previously
    /// registered services and subscriptions are re-established").
    pub fn registered_service_names(&self) -> Vec<String> {
        self.registrations.lock().keys().cloned().collect()
    }

    pub fn subscribed_service_names(&self) -> Vec<String> {
        self.online_listeners.lock().keys().cloned().collect()
    }

    pub fn on_reconnect(&self) {
        info!(
            services = self.registered_service_names().len(),
            subscriptions = self.subscribed_service_names().len(),
            "name server reconnected, re-establishing state"
        );
        self.mark_connected();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_preserves_registrations_and_subscriptions() {
        let client = NameResolutionClient::new();
        let bound = vec![BusUrl::parse("tcp://127.0.0.1:60002").unwrap()];
        client.record_registration("svc.a", bound.clone());
        client.subscribe_service_online("svc.a", Box::new(|_| {}));
        client.mark_disconnected();
        assert!(!client.is_connected());
        client.on_reconnect();
        assert!(client.is_connected());
        assert_eq!(client.registered_service_names(), vec!["svc.a".to_string()]);
        assert_eq!(client.subscribed_service_names(), vec!["svc.a".to_string()]);
        assert_eq!(client.bound_addresses("svc.a"), bound);
    }

    #[test]
    fn empty_address_list_notification_still_dispatches_to_listener() {
        let client = NameResolutionClient::new();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        client.subscribe_service_online(
            "svc.b",
            Box::new(move |update| *seen2.lock() = Some(update.address_list.len())),
        );
        client.dispatch_online(&ServiceAddressList {
            service_name: "svc.b".to_string(),
            host_name: "host1".to_string(),
            is_local: true,
            address_list: vec![],
            token_list: vec![],
        });
        assert_eq!(*seen.lock(), Some(0));
    }
}
