//! Observer fan-out for broker lifecycle events.
//!
//! Corresponds to spec component 4.7. Interceptors are notified after the
//! processor has already committed the corresponding state change; a slow
//! or panicking observer must never hold up the processor, so each
//! notification is dispatched on its own task.

use std::sync::Arc;

use mercurio_core::qos::QoS;

/// Receives fire-and-forget notifications of broker activity.
///
/// Every method has a no-op default so an implementation only needs to
/// override the events it cares about.
pub trait Interceptor: Send + Sync + 'static {
    fn on_connected(&self, _client_id: &str) {}
    fn on_disconnected(&self, _client_id: &str) {}
    fn on_connection_lost(&self, _client_id: &str) {}
    fn on_published(&self, _client_id: &str, _topic: &str, _qos: QoS) {}
    fn on_subscribed(&self, _client_id: &str, _filter: &str, _qos: QoS) {}
    fn on_unsubscribed(&self, _client_id: &str, _filter: &str) {}
    fn on_puback(&self, _client_id: &str, _packet_id: u16) {}
}

/// Holds the registered observers and dispatches each notification onto
/// its own `tokio::spawn`ed task, so the processor's calling task never
/// blocks on (or is cancelled by a panic in) an observer.
#[derive(Clone, Default)]
pub(crate) struct InterceptorRegistry {
    observers: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn Interceptor>) {
        self.observers.push(observer);
    }

    pub fn notify_connected(&self, client_id: &str) {
        let client_id = client_id.to_string();
        for observer in self.observers.clone() {
            let client_id = client_id.clone();
            tokio::spawn(async move { observer.on_connected(&client_id) });
        }
    }

    pub fn notify_disconnected(&self, client_id: &str) {
        let client_id = client_id.to_string();
        for observer in self.observers.clone() {
            let client_id = client_id.clone();
            tokio::spawn(async move { observer.on_disconnected(&client_id) });
        }
    }

    pub fn notify_connection_lost(&self, client_id: &str) {
        let client_id = client_id.to_string();
        for observer in self.observers.clone() {
            let client_id = client_id.clone();
            tokio::spawn(async move { observer.on_connection_lost(&client_id) });
        }
    }

    pub fn notify_published(&self, client_id: &str, topic: &str, qos: QoS) {
        let client_id = client_id.to_string();
        let topic = topic.to_string();
        for observer in self.observers.clone() {
            let client_id = client_id.clone();
            let topic = topic.clone();
            tokio::spawn(async move { observer.on_published(&client_id, &topic, qos) });
        }
    }

    pub fn notify_subscribed(&self, client_id: &str, filter: &str, qos: QoS) {
        let client_id = client_id.to_string();
        let filter = filter.to_string();
        for observer in self.observers.clone() {
            let client_id = client_id.clone();
            let filter = filter.clone();
            tokio::spawn(async move { observer.on_subscribed(&client_id, &filter, qos) });
        }
    }

    pub fn notify_unsubscribed(&self, client_id: &str, filter: &str) {
        let client_id = client_id.to_string();
        let filter = filter.to_string();
        for observer in self.observers.clone() {
            let client_id = client_id.clone();
            let filter = filter.clone();
            tokio::spawn(async move { observer.on_unsubscribed(&client_id, &filter) });
        }
    }

    pub fn notify_puback(&self, client_id: &str, packet_id: u16) {
        let client_id = client_id.to_string();
        for observer in self.observers.clone() {
            let client_id = client_id.clone();
            tokio::spawn(async move { observer.on_puback(&client_id, packet_id) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingInterceptor {
        connected: AtomicUsize,
        published: AtomicUsize,
    }

    impl Interceptor for CountingInterceptor {
        fn on_connected(&self, _client_id: &str) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_published(&self, _client_id: &str, _topic: &str, _qos: QoS) {
            self.published.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn notifies_all_registered_observers() {
        let counter = Arc::new(CountingInterceptor {
            connected: AtomicUsize::new(0),
            published: AtomicUsize::new(0),
        });

        let mut registry = InterceptorRegistry::new();
        registry.register(counter.clone());

        registry.notify_connected("c1");
        registry.notify_published("c1", "a/b", QoS::AtLeastOnce);

        // Notifications are spawned tasks; yield until they run.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(counter.connected.load(Ordering::SeqCst), 1);
        assert_eq!(counter.published.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_methods_are_no_ops() {
        struct Silent;
        impl Interceptor for Silent {}
        let s = Silent;
        s.on_connected("c1");
        s.on_disconnected("c1");
        s.on_connection_lost("c1");
        s.on_published("c1", "a", QoS::AtMostOnce);
        s.on_subscribed("c1", "a", QoS::AtMostOnce);
        s.on_unsubscribed("c1", "a");
        s.on_puback("c1", 1);
    }
}
