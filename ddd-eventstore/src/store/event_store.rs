//! 事件存储入口（EventStore）
//!
//! 在一处完成装配：连接提供者、重连策略、序列化器、注册表与配置，
//! 并向外暴露写门面、读门面与持久订阅器。
//!
use super::{ReadEventStore, WriteEventStore};
use crate::client::ConnectionFactory;
use crate::connection::{ConnectionProvider, ConnectionStrategy, FixedRetryStrategy};
use crate::pipeline::EventRegistry;
use crate::serializer::Serializer;
use crate::settings::EventStoreSettings;
use crate::subscription::PersistentSubscriber;
use bon::bon;
use std::sync::Arc;

pub struct EventStore {
    write: WriteEventStore,
    read: ReadEventStore,
    subscriber: Arc<PersistentSubscriber>,
    connections: Arc<ConnectionProvider>,
    settings: Arc<EventStoreSettings>,
}

#[bon]
impl EventStore {
    #[builder]
    pub fn new(
        settings: EventStoreSettings,
        factory: Arc<dyn ConnectionFactory>,
        #[builder(default)] registry: EventRegistry,
        #[builder(default = Arc::new(FixedRetryStrategy::default()))] strategy: Arc<
            dyn ConnectionStrategy,
        >,
    ) -> Self {
        let settings = Arc::new(settings);
        let registry = Arc::new(registry);
        let serializer = Arc::new(Serializer::new(registry.event_types()));
        let connections = Arc::new(ConnectionProvider::new(factory, settings.clone()));

        let write = WriteEventStore::new(
            connections.clone(),
            strategy.clone(),
            serializer.clone(),
            registry.clone(),
        );
        let read = ReadEventStore::new(
            connections.clone(),
            strategy.clone(),
            serializer.clone(),
            settings.clone(),
        );
        let subscriber = Arc::new(PersistentSubscriber::new(
            connections.clone(),
            strategy,
            serializer,
            registry,
            settings.clone(),
        ));

        Self {
            write,
            read,
            subscriber,
            connections,
            settings,
        }
    }
}

impl EventStore {
    pub fn write(&self) -> &WriteEventStore {
        &self.write
    }

    pub fn read(&self) -> &ReadEventStore {
        &self.read
    }

    pub fn subscriber(&self) -> &Arc<PersistentSubscriber> {
        &self.subscriber
    }

    pub fn settings(&self) -> &EventStoreSettings {
        &self.settings
    }

    /// 停止全部订阅循环并释放连接；重复调用无副作用
    pub async fn stop_connections(&self) {
        self.subscriber.stop();
        self.connections.stop_connections().await;
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("settings", &self.settings)
            .field("subscriber", &self.subscriber)
            .finish_non_exhaustive()
    }
}
