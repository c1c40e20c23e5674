use std::sync::{Arc, Mutex};

type ChangeHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ChangeTopic {
    #[display("charge point {_0}")]
    ChargePoint(String),
    #[display("grid")]
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

//Handlers run inline with message processing, in subscription order, and
//should return quickly.
#[derive(Default)]
pub struct ChangeNotifier {
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

struct Subscription {
    id: u64,
    topic: ChangeTopic,
    handler: ChangeHandler,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        topic: ChangeTopic,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut registry = self.lock();
        registry.next_id += 1;

        let id = registry.next_id;
        registry.subscriptions.push(Subscription {
            id,
            topic,
            handler: Arc::new(handler),
        });

        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscriptions.retain(|s| s.id != id.0);
    }

    pub fn notify(&self, topic: &ChangeTopic) {
        for handler in self.handlers_for(Some(topic)) {
            handler();
        }
    }

    //signal every subscriber at once, e.g. when a lost connection makes all
    //cached values suspect
    pub fn notify_all(&self) {
        for handler in self.handlers_for(None) {
            handler();
        }
    }

    //Handlers are cloned out so a handler may subscribe/unsubscribe without
    //deadlocking on the registry.
    fn handlers_for(&self, topic: Option<&ChangeTopic>) -> Vec<ChangeHandler> {
        self.lock()
            .subscriptions
            .iter()
            .filter(|s| topic.is_none_or(|t| s.topic == *t))
            .map(|s| s.handler.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
