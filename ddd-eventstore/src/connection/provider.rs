//! 连接提供者（ConnectionProvider）
//!
//! 管理三个相互独立、惰性构建的句柄：读、写、持久订阅管理。每个句柄槽是一个显式状态机：
//! - `Pending`：尚未构建（或已失效），下次获取时由工厂构建；
//! - `Active`：已构建，携带代次号；
//! - `Stopped`：全局停止后不再构建。
//!
//! 失效通过代次号比对完成：只有仍处于当前代次的句柄才会被替换，
//! 过期句柄的断连报告被忽略，正在使用旧句柄的调用自行完成或失败。
//!
use crate::client::{
    ConnectionFactory, Disposable, LogStoreClient, PersistentSubscriptionsClient,
};
use crate::error::{EventStoreError, EventStoreResult, StoreError};
use crate::settings::EventStoreSettings;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Factory<T> = Box<dyn Fn() -> Result<Arc<T>, StoreError> + Send + Sync>;

/// 带代次号的客户端句柄
pub struct ClientHandle<T: ?Sized> {
    client: Arc<T>,
    generation: u64,
}

impl<T: ?Sized> ClientHandle<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T: ?Sized> Clone for ClientHandle<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            generation: self.generation,
        }
    }
}

impl<T: ?Sized> Deref for ClientHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.client
    }
}

enum Slot<T: ?Sized> {
    Pending,
    Active(ClientHandle<T>),
    Stopped,
}

struct LazyHandle<T: ?Sized> {
    name: &'static str,
    slot: Mutex<Slot<T>>,
    generations: AtomicU64,
    factory: Factory<T>,
}

impl<T: ?Sized + Disposable> LazyHandle<T> {
    fn new(name: &'static str, factory: Factory<T>) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot::Pending),
            generations: AtomicU64::new(0),
            factory,
        }
    }

    fn get(&self) -> EventStoreResult<ClientHandle<T>> {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Active(handle) => Ok(handle.clone()),
            Slot::Stopped => Err(EventStoreError::ConnectionsStopped),
            Slot::Pending => {
                let client = (self.factory)().map_err(|err| {
                    tracing::warn!(
                        handle = self.name,
                        error = %err,
                        "failed to create log store client"
                    );
                    EventStoreError::ConnectionFailed
                })?;
                let handle = ClientHandle {
                    client,
                    generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
                };
                *slot = Slot::Active(handle.clone());
                Ok(handle)
            }
        }
    }

    /// 若 `stale` 仍为当前句柄则令其失效，返回需要释放的客户端
    fn invalidate(&self, stale: &ClientHandle<T>) -> Option<Arc<T>> {
        let mut slot = self.slot.lock();
        let is_current = matches!(
            &*slot,
            Slot::Active(current) if current.generation == stale.generation
        );
        if !is_current {
            return None;
        }
        *slot = Slot::Pending;
        Some(stale.client.clone())
    }

    fn stop(&self) -> Option<Arc<T>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Stopped) {
            Slot::Active(handle) => Some(handle.client),
            Slot::Pending | Slot::Stopped => None,
        }
    }

    async fn dispose(&self, client: Arc<T>) {
        if let Err(err) = client.dispose().await {
            tracing::warn!(handle = self.name, error = %err, "failed to dispose log store client");
        }
    }

    async fn disconnected(&self, stale: &ClientHandle<T>) {
        if let Some(client) = self.invalidate(stale) {
            tracing::debug!(
                handle = self.name,
                generation = stale.generation,
                "replacing disconnected client"
            );
            self.dispose(client).await;
        }
    }
}

fn client_factory(
    factory: Arc<dyn ConnectionFactory>,
    settings: Arc<EventStoreSettings>,
) -> Factory<dyn LogStoreClient> {
    Box::new(move || factory.create_client(&settings))
}

/// 连接提供者：读、写、持久订阅三个句柄
pub struct ConnectionProvider {
    read: LazyHandle<dyn LogStoreClient>,
    write: LazyHandle<dyn LogStoreClient>,
    persistent: LazyHandle<dyn PersistentSubscriptionsClient>,
    stopped: Mutex<bool>,
}

impl ConnectionProvider {
    pub fn new(factory: Arc<dyn ConnectionFactory>, settings: Arc<EventStoreSettings>) -> Self {
        let persistent_factory: Factory<dyn PersistentSubscriptionsClient> = {
            let factory = factory.clone();
            let settings = settings.clone();
            Box::new(move || factory.create_persistent_subscriptions_client(&settings))
        };

        Self {
            read: LazyHandle::new("read", client_factory(factory.clone(), settings.clone())),
            write: LazyHandle::new("write", client_factory(factory, settings)),
            persistent: LazyHandle::new("persistent", persistent_factory),
            stopped: Mutex::new(false),
        }
    }

    pub fn read_client(&self) -> EventStoreResult<ClientHandle<dyn LogStoreClient>> {
        self.read.get()
    }

    pub fn write_client(&self) -> EventStoreResult<ClientHandle<dyn LogStoreClient>> {
        self.write.get()
    }

    pub fn persistent_subscriptions_client(
        &self,
    ) -> EventStoreResult<ClientHandle<dyn PersistentSubscriptionsClient>> {
        self.persistent.get()
    }

    pub async fn read_client_disconnected(&self, stale: &ClientHandle<dyn LogStoreClient>) {
        self.read.disconnected(stale).await;
    }

    pub async fn write_client_disconnected(&self, stale: &ClientHandle<dyn LogStoreClient>) {
        self.write.disconnected(stale).await;
    }

    pub async fn persistent_subscriptions_client_disconnected(
        &self,
        stale: &ClientHandle<dyn PersistentSubscriptionsClient>,
    ) {
        self.persistent.disconnected(stale).await;
    }

    /// 一次性停止：释放已构建的句柄，之后不再构建新句柄；重复调用无副作用
    pub async fn stop_connections(&self) {
        {
            let mut stopped = self.stopped.lock();
            if *stopped {
                return;
            }
            *stopped = true;
        }

        if let Some(client) = self.read.stop() {
            self.read.dispose(client).await;
        }
        if let Some(client) = self.write.stop() {
            self.write.dispose(client).await;
        }
        if let Some(client) = self.persistent.stop() {
            self.persistent.dispose(client).await;
        }
        tracing::debug!("log store connections stopped");
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }
}
