//! Retention sweep and late-attach behavior.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sluice::{
    Connection, DeliveryError, EngineConfig, EventType, ProgressReporter, RunNotFound,
    RunRegistry, StepArgs, StepCapability, StepError, StepRegistry, SubscriptionManager,
};

struct OkStep;

#[async_trait]
impl StepCapability for OkStep {
    async fn execute(&self, _args: &StepArgs, _progress: &ProgressReporter) -> Result<(), StepError> {
        Ok(())
    }
}

struct ChannelConnection {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn send_text(&self, message: String) -> Result<(), DeliveryError> {
        self.tx
            .send(message)
            .map_err(|e| DeliveryError(e.to_string()))
    }
}

fn zero_retention_engine() -> (Arc<RunRegistry>, SubscriptionManager) {
    let mut steps = StepRegistry::new();
    steps.register("extract_csv", OkStep).unwrap();

    let config = EngineConfig {
        retention_secs: 0,
        ..EngineConfig::default()
    };
    let registry = Arc::new(RunRegistry::new(Arc::new(steps), config.clone()));
    let manager = SubscriptionManager::new(Arc::clone(&registry), &config);
    (registry, manager)
}

#[tokio::test]
async fn test_evicted_run_is_gone_everywhere() {
    let (registry, manager) = zero_retention_engine();

    let run_id = registry
        .create(vec!["extract_csv".to_string()], StepArgs::new())
        .await
        .unwrap();
    registry.wait(run_id).await.unwrap();

    assert_eq!(registry.sweep().await, 1);

    // A client arriving after eviction gets an explicit not-found, not silence
    assert!(matches!(registry.get(run_id).await, Err(RunNotFound(_))));
    assert!(registry.cancel(run_id).await.is_err());
    assert!(registry.subscribe(run_id).await.is_err());

    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(manager
        .attach(Arc::new(ChannelConnection { tx }), run_id)
        .await
        .is_err());
}

#[tokio::test]
async fn test_existing_subscriber_survives_eviction() {
    let (registry, _manager) = zero_retention_engine();

    let run_id = registry
        .create(vec!["extract_csv".to_string()], StepArgs::new())
        .await
        .unwrap();
    registry.wait(run_id).await.unwrap();

    let mut subscription = registry.subscribe(run_id).await.unwrap();
    assert_eq!(registry.sweep().await, 1);

    // The bus outlives its registry entry for subscribers already attached
    let mut seen = Vec::new();
    while let Some(event) = subscription.next().await {
        seen.push(event.event_type);
    }
    assert_eq!(
        seen,
        vec![
            EventType::Started,
            EventType::StepStarted,
            EventType::StepCompleted,
            EventType::Completed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_evicts_periodically() {
    let (registry, _manager) = zero_retention_engine();

    let run_id = registry
        .create(vec!["extract_csv".to_string()], StepArgs::new())
        .await
        .unwrap();
    registry.wait(run_id).await.unwrap();

    let sweeper = RunRegistry::spawn_sweeper(Arc::clone(&registry), Duration::from_secs(60));

    let mut evicted = false;
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(61)).await;
        if registry.get(run_id).await.is_err() {
            evicted = true;
            break;
        }
    }
    sweeper.abort();

    assert!(evicted);
}
