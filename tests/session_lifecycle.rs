//! Cross-component lifecycle tests.
//!
//! Wires a session manager, a payment engine and the hermes promise
//! handler together over the event bus, the way a running provider
//! does: the engine forwards each settled payment to the handler on
//! its own, the manager only reacts to engine termination.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use veilnet_provider::error::{Error, Result};
use veilnet_provider::event::{AppEvent, EventBus, ServiceStatus, SessionStatus};
use veilnet_provider::identity::{Address, Identity};
use veilnet_provider::payment::engine::{PaymentEngine, PaymentEngineFactory};
use veilnet_provider::payment::hermes::{
    Encryption, FeeProvider, HermesApiError, HermesHttpRequester, HermesUrlGetter,
};
use veilnet_provider::payment::promise::{
    derive_channel_id, ExchangeMessage, FeesResponse, Promise, RequestPromise,
};
use veilnet_provider::payment::storage::{MemoryPromiseStorage, PromiseStorage};
use veilnet_provider::payment::{HermesPromiseHandler, HermesPromiseHandlerDeps};
use veilnet_provider::session::{Proposal, SessionManager, SessionStore};
use veilnet_provider::ProviderConfig;

const PROVIDER: &str = "0x000000000000000000000000000000000000beef";
const CONSUMER: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const HERMES_ID: Address = Address::new([0x11; 20]);
const ACCOUNTANT: Address = Address::new([0x11; 20]);

struct StubHermes;

#[async_trait]
impl HermesHttpRequester for StubHermes {
    async fn request_promise(
        &self,
        request: RequestPromise,
    ) -> std::result::Result<Promise, HermesApiError> {
        Ok(Promise {
            chain_id: request.exchange_message.chain_id,
            amount: request.exchange_message.amount,
            fee: request.transactor_fee,
            hashlock: "0xlock".to_string(),
            signature: "0xhermes-sig".to_string(),
        })
    }

    async fn reveal_r(
        &self,
        _r: &str,
        _provider: &str,
        _agreement_id: u64,
    ) -> std::result::Result<(), HermesApiError> {
        Ok(())
    }

    async fn update_promise_fee(
        &self,
        promise: Promise,
        _new_fee: u128,
    ) -> std::result::Result<Promise, HermesApiError> {
        Ok(promise)
    }
}

struct StubEncryption;

impl Encryption for StubEncryption {
    fn encrypt(&self, _address: Address, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.iter().map(|b| b ^ 0x5C).collect())
    }

    fn decrypt(&self, _address: Address, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.iter().map(|b| b ^ 0x5C).collect())
    }
}

struct StubUrlGetter;

impl HermesUrlGetter for StubUrlGetter {
    fn hermes_url(&self, _hermes_id: Address) -> Result<String> {
        Ok("http://hermes.test".to_string())
    }
}

struct StubFeeProvider;

#[async_trait]
impl FeeProvider for StubFeeProvider {
    async fn fetch_settle_fees(&self, _chain_id: i64) -> Result<FeesResponse> {
        Ok(FeesResponse {
            fee: 10,
            valid_until: chrono::Utc::now() + chrono::Duration::hours(1),
        })
    }
}

/// Engine that settles the first invoice instantly and forwards one
/// payment to the promise handler, like a real exchange loop would.
struct ForwardingEngine {
    handler: Arc<HermesPromiseHandler>,
    session_id: String,
    stop_count: AtomicUsize,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl ForwardingEngine {
    fn new(handler: Arc<HermesPromiseHandler>, session_id: String) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            handler,
            session_id,
            stop_count: AtomicUsize::new(0),
            stop_tx,
            stop_rx,
        })
    }
}

#[async_trait]
impl PaymentEngine for ForwardingEngine {
    async fn start(&self) -> Result<()> {
        let mut err_rx = self
            .handler
            .request_promise(
                vec![0xAB],
                ExchangeMessage {
                    chain_id: 1,
                    agreement_id: 42,
                    agreement_total: 1000,
                    amount: 100,
                    provider: PROVIDER.to_string(),
                    hermes_id: HERMES_ID,
                    signature: "0xsig".to_string(),
                },
                Identity::from_address(PROVIDER),
                self.session_id.clone(),
            )
            .await;
        if let Some(e) = err_rx.recv().await {
            return Err(Error::PaymentEngine(e.to_string()));
        }

        let mut stop_rx = self.stop_rx.clone();
        while !*stop_rx.borrow_and_update() {
            if stop_rx.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn wait_first_invoice(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn stop(&self) {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
    }
}

struct Deployment {
    manager: Arc<SessionManager>,
    store: Arc<SessionStore>,
    promises: Arc<MemoryPromiseStorage>,
    bus: EventBus,
    engines: Arc<Mutex<Vec<Arc<ForwardingEngine>>>>,
}

async fn deploy() -> Deployment {
    let bus = EventBus::new();
    let store = Arc::new(SessionStore::new());
    let promises = Arc::new(MemoryPromiseStorage::new());

    let handler = HermesPromiseHandler::new(HermesPromiseHandlerDeps {
        promise_storage: Arc::clone(&promises) as Arc<dyn PromiseStorage>,
        fee_provider: Arc::new(StubFeeProvider),
        encryption: Arc::new(StubEncryption),
        event_bus: bus.clone(),
        hermes_url_getter: Arc::new(StubUrlGetter),
        hermes_caller_factory: Box::new(|_url| Arc::new(StubHermes) as Arc<dyn HermesHttpRequester>),
        chain_id: 1,
    });
    handler.subscribe(&bus);

    let engines = Arc::new(Mutex::new(Vec::new()));
    let factory: PaymentEngineFactory = {
        let handler = Arc::clone(&handler);
        let engines = Arc::clone(&engines);
        Box::new(move |_provider, _consumer, _accountant, session_id| {
            let engine = ForwardingEngine::new(Arc::clone(&handler), session_id.to_string());
            engines.lock().push(Arc::clone(&engine));
            Ok(engine as Arc<dyn PaymentEngine>)
        })
    };

    let manager = SessionManager::new(
        Proposal {
            id: 7,
            provider_id: PROVIDER.to_string(),
            service_type: "vpn".to_string(),
        },
        "service-1".to_string(),
        Arc::clone(&store),
        factory,
        bus.clone(),
        None,
        ProviderConfig::default(),
    );

    bus.publish(AppEvent::ServiceStatus(ServiceStatus::Running));
    tokio::time::sleep(Duration::from_millis(20)).await;

    Deployment {
        manager,
        store,
        promises,
        bus,
        engines,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_session_earns_and_settles() {
    let deployment = deploy().await;
    let mut events = deployment.bus.subscribe();

    let session = deployment
        .manager
        .start(Identity::from_address(CONSUMER), ACCOUNTANT, 7)
        .await
        .expect("admission succeeds");

    assert!(deployment.store.find(&session.id).is_some());

    // The engine's forwarded payment reaches the promise store.
    let channel_id = derive_channel_id(PROVIDER, &HERMES_ID.to_hex()).expect("derive");
    let promises = Arc::clone(&deployment.promises);
    wait_until(move || promises.get(&channel_id, 42).is_some()).await;
    let channel_id = derive_channel_id(PROVIDER, &HERMES_ID.to_hex()).expect("derive");
    let stored = deployment.promises.get(&channel_id, 42).expect("promise");
    assert!(stored.revealed);

    // Earnings were published for this session with the running total.
    let mut earned_total = None;
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event stream alive")
            .expect("bus open")
        {
            AppEvent::TokensEarned(earned) if earned.session_id == session.id => {
                earned_total = Some(earned.total);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(earned_total, Some(1000));

    // Destruction stops the engine exactly once.
    deployment
        .manager
        .destroy(&Identity::from_address(CONSUMER), &session.id)
        .await
        .expect("destroy succeeds");
    assert!(deployment.store.find(&session.id).is_none());

    let engine = Arc::clone(&deployment.engines.lock()[0]);
    wait_until(move || engine.stop_count.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_restart_for_same_consumer_replaces_session() {
    let deployment = deploy().await;

    let consumer = Identity::from_address(CONSUMER);
    let first = deployment
        .manager
        .start(consumer.clone(), ACCOUNTANT, 7)
        .await
        .expect("first admission");
    let second = deployment
        .manager
        .start(consumer.clone(), ACCOUNTANT, 7)
        .await
        .expect("second admission");

    let stale = first.done.clone();
    wait_until(move || stale.is_closed()).await;

    // The stale engine was stopped along with its session.
    let stale_engine = Arc::clone(&deployment.engines.lock()[0]);
    wait_until(move || stale_engine.stop_count.load(Ordering::SeqCst) == 1).await;

    assert!(deployment.store.find(&second.id).is_some());
    assert!(!second.done.is_closed());
}

#[tokio::test]
async fn test_acknowledged_status_reaches_subscribers() {
    let deployment = deploy().await;

    let consumer = Identity::from_address(CONSUMER);
    let session = deployment
        .manager
        .start(consumer.clone(), ACCOUNTANT, 7)
        .await
        .expect("admission");

    let mut events = deployment.bus.subscribe();
    deployment
        .manager
        .acknowledge(&consumer, &session.id)
        .await
        .expect("acknowledge");

    loop {
        match tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event arrives")
            .expect("bus open")
        {
            AppEvent::Session(event) if event.id == session.id => {
                assert_eq!(event.status, SessionStatus::Acknowledged);
                break;
            }
            _ => {}
        }
    }
}
