//! Braid block DAG module for Caryatid
//! Orders blocks with GHOSTDAG, keeps the virtual UTXO set and tracks finality

pub mod block_index;
pub mod block_node;
pub mod block_queues;
pub mod chain_selector;
pub mod dag;
pub mod dag_error;
pub mod dag_store;
pub mod finality;
pub mod fjall_dag_store;
pub mod ghostdag;
pub mod proof_of_work;
pub mod time_source;
pub mod utxo_diff;
pub mod utxo_set;
pub mod virtual_manager;

use anyhow::{bail, Result};
use braid_common::{
    events::{
        BlockAddedEvent, ChainChangedEvent, DAGEvent, DAGObserver, FinalityConflictEvent,
        FinalityConflictResolvedEvent, TransactionAddedEvent, UTXOOfAddressChangedEvent,
    },
    messages::{BlockRejectedMessage, Message},
    params::{self, DAGParams},
    BlockHash,
};
use caryatid_sdk::{module, Context};
use config::Config;
use dag::{BehaviorFlags, BlockDAG, BlockOutcome};
use dag_error::DAGError;
use dag_store::{DAGStore, InMemoryDAGStore};
use fjall_dag_store::FjallDAGStore;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

const DEFAULT_SUBSCRIBE_BLOCKS_TOPIC: &str = "braid.block.available";
const DEFAULT_SUBSCRIBE_RESOLVE_TOPIC: &str = "braid.finality.resolve";
const DEFAULT_CLOCK_TICK_TOPIC: &str = "clock.tick";
const DEFAULT_PUBLISH_EVENTS_TOPIC: &str = "braid.dag.events";
const DEFAULT_PUBLISH_REJECTED_TOPIC: &str = "braid.block.rejected";
const DEFAULT_STORE: &str = "memory";

/// Shared event queue between the observer and the main loop.
type EventQueue = Arc<Mutex<Vec<DAGEvent>>>;

/// Observer that queues DAG events for later async publishing.
struct QueueObserver {
    events: EventQueue,
}

impl QueueObserver {
    fn push(&self, event: DAGEvent) {
        self.events.lock().push(event);
    }
}

impl DAGObserver for QueueObserver {
    fn block_added(&self, event: &BlockAddedEvent) {
        self.push(DAGEvent::BlockAdded(event.clone()));
    }

    fn transaction_added(&self, event: &TransactionAddedEvent) {
        self.push(DAGEvent::TransactionAdded(event.clone()));
    }

    fn chain_changed(&self, event: &ChainChangedEvent) {
        self.push(DAGEvent::ChainChanged(event.clone()));
    }

    fn finality_conflict(&self, event: &FinalityConflictEvent) {
        self.push(DAGEvent::FinalityConflict(event.clone()));
    }

    fn finality_conflict_resolved(&self, event: &FinalityConflictResolvedEvent) {
        self.push(DAGEvent::FinalityConflictResolved(event.clone()));
    }

    fn utxo_of_address_changed(&self, event: &UTXOOfAddressChangedEvent) {
        self.push(DAGEvent::UTXOOfAddressChanged(event.clone()));
    }
}

/// Non-negative integer setting. A missing key takes `default`; a negative or
/// oversized value is logged and takes it too.
fn get_count<T>(config: &Config, key: &str, default: T) -> T
where
    T: TryFrom<i64> + Copy + fmt::Display,
{
    let Ok(value) = config.get_int(key) else {
        return default;
    };
    match T::try_from(value) {
        Ok(count) if value >= 0 => count,
        _ => {
            warn!("Ignoring out of range '{key}' = {value}, using {default}");
            default
        }
    }
}

/// Read consensus parameters, falling back to the defaults
fn read_params(config: &Config) -> DAGParams {
    let defaults = DAGParams::default();
    let orphan_expiration_secs =
        get_count(config, "orphan-expiration-secs", params::DEFAULT_ORPHAN_EXPIRATION_SECS);

    DAGParams {
        k: get_count(config, "k", defaults.k),
        finality_depth: get_count(config, "finality-depth", defaults.finality_depth),
        max_parents: get_count(config, "max-parents", defaults.max_parents),
        timestamp_deviation_ms: get_count(
            config,
            "timestamp-deviation-ms",
            defaults.timestamp_deviation_ms,
        ),
        max_orphan_blocks: get_count(config, "max-orphan-blocks", defaults.max_orphan_blocks),
        orphan_expiration_ms: orphan_expiration_secs.saturating_mul(1000),
        ..defaults
    }
}

fn open_store(config: Arc<Config>) -> Result<Arc<dyn DAGStore>> {
    let store = config.get_string("store").unwrap_or(DEFAULT_STORE.to_string());
    Ok(match store.as_str() {
        "memory" => Arc::new(InMemoryDAGStore::new()),
        "fjall" => Arc::new(FjallDAGStore::new(config)?),
        _ => bail!("Unknown store type {store}"),
    })
}

/// Block DAG module
/// Parameterised by the outer message enum used on the bus
#[module(
    message_type(Message),
    name = "blockdag",
    description = "GHOSTDAG block DAG with virtual UTXO state"
)]
pub struct BlockDAGState;

impl BlockDAGState {
    /// Main init function
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        // Get configuration
        let subscribe_blocks_topic = config
            .get_string("subscribe-blocks-topic")
            .unwrap_or(DEFAULT_SUBSCRIBE_BLOCKS_TOPIC.to_string());
        info!("Creating blocks subscriber on '{subscribe_blocks_topic}'");

        let subscribe_resolve_topic = config
            .get_string("subscribe-resolve-topic")
            .unwrap_or(DEFAULT_SUBSCRIBE_RESOLVE_TOPIC.to_string());
        info!("Creating finality resolution subscriber on '{subscribe_resolve_topic}'");

        let clock_tick_topic =
            config.get_string("clock-tick-topic").unwrap_or(DEFAULT_CLOCK_TICK_TOPIC.to_string());

        let publish_events_topic = config
            .get_string("publish-events-topic")
            .unwrap_or(DEFAULT_PUBLISH_EVENTS_TOPIC.to_string());
        info!("Publishing DAG events on '{publish_events_topic}'");

        let publish_rejected_topic = config
            .get_string("publish-rejected-topic")
            .unwrap_or(DEFAULT_PUBLISH_REJECTED_TOPIC.to_string());
        info!("Publishing rejected blocks on '{publish_rejected_topic}'");

        let params = read_params(&config);
        info!(
            "GHOSTDAG k={}, finality depth {}, max parents {}",
            params.k, params.finality_depth, params.max_parents
        );

        let store = open_store(config.clone())?;
        let dag = Arc::new(BlockDAG::new(params, store)?);

        let event_queue: EventQueue = Arc::new(Mutex::new(Vec::new()));
        dag.register_observer(Arc::new(QueueObserver {
            events: event_queue.clone(),
        }));

        let mut block_subscription = context.subscribe(&subscribe_blocks_topic).await?;
        let mut resolve_subscription = context.subscribe(&subscribe_resolve_topic).await?;
        let mut clock_subscription = context.subscribe(&clock_tick_topic).await?;

        context.clone().run(async move {
            loop {
                tokio::select! {
                    result = block_subscription.read() => {
                        let Ok((_, message)) = result else {
                            error!("Block message read failed");
                            break;
                        };
                        let Message::BlockAvailable(available) = message.as_ref() else {
                            debug!("Ignoring non-BlockAvailable message on blocks topic");
                            continue;
                        };

                        let hash = available.block.hash();
                        let span = info_span!("blockdag", block = %hash);
                        async {
                            for (hash, e) in drain_delayed(&dag) {
                                publish_rejected(&context, &publish_rejected_topic, hash, &e).await;
                            }
                            match dag.process_block(available.block.clone(), BehaviorFlags::NONE) {
                                Ok(BlockOutcome::Accepted) => {
                                    debug!(blue_score = ?dag.blue_score(&hash).ok(), "Block accepted");
                                }
                                Ok(BlockOutcome::Orphan { missing }) => {
                                    info!("Block waiting for {} parents", missing.len());
                                }
                                Ok(BlockOutcome::Delayed { process_at }) => {
                                    info!(process_at, "Block delayed");
                                }
                                Err(e) => {
                                    publish_rejected(&context, &publish_rejected_topic, hash, &e).await;
                                }
                            }
                            publish_events(&context, &publish_events_topic, &event_queue).await;
                        }
                        .instrument(span)
                        .await;
                    }

                    result = resolve_subscription.read() => {
                        let Ok((_, message)) = result else {
                            error!("Resolution message read failed");
                            break;
                        };
                        let Message::ResolveFinalityConflict(resolve) = message.as_ref() else {
                            debug!("Ignoring unknown message on resolution topic");
                            continue;
                        };

                        let span = info_span!("blockdag-resolve", winner = %resolve.finality_block_hash);
                        async {
                            if let Err(e) = dag.resolve_finality_conflict(resolve.finality_block_hash) {
                                warn!("Finality conflict resolution failed: {e}");
                            }
                            publish_events(&context, &publish_events_topic, &event_queue).await;
                        }
                        .instrument(span)
                        .await;
                    }

                    result = clock_subscription.read() => {
                        let Ok((_, message)) = result else {
                            error!("Clock message read failed");
                            break;
                        };
                        if let Message::Clock(tick) = message.as_ref() {
                            for (hash, e) in drain_delayed(&dag) {
                                publish_rejected(&context, &publish_rejected_topic, hash, &e).await;
                            }
                            publish_events(&context, &publish_events_topic, &event_queue).await;

                            if tick.number % 60 == 0 {
                                info!(
                                    blocks = dag.block_count(),
                                    tip = %dag.selected_tip(),
                                    utxos = dag.utxo_count(),
                                    orphans = dag.orphan_count(),
                                    delayed = dag.delayed_count(),
                                    "DAG status"
                                );
                            }
                        }
                    }

                    _ = delayed_block_due(&dag) => {
                        let span = info_span!("blockdag-delayed");
                        async {
                            for (hash, e) in drain_delayed(&dag) {
                                publish_rejected(&context, &publish_rejected_topic, hash, &e).await;
                            }
                            publish_events(&context, &publish_events_topic, &event_queue).await;
                        }
                        .instrument(span)
                        .await;
                    }
                }
            }

            dag.shutdown().await;
        });

        Ok(())
    }
}

/// Resolves when the earliest delayed block is due, never while none is held
async fn delayed_block_due(dag: &BlockDAG) {
    match dag.next_delayed_wait() {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

/// Process the delayed blocks that are due and return the rejected ones
fn drain_delayed(dag: &BlockDAG) -> Vec<(BlockHash, DAGError)> {
    dag.process_delayed_blocks()
        .into_iter()
        .filter_map(|(hash, result)| result.err().map(|e| (hash, e)))
        .collect()
}

/// Publish everything the observer queued since the last call
async fn publish_events(context: &Arc<Context<Message>>, topic: &str, event_queue: &EventQueue) {
    let events: Vec<DAGEvent> = event_queue.lock().drain(..).collect();
    for event in events {
        context
            .message_bus
            .publish(topic, Arc::new(Message::DAG(event)))
            .await
            .unwrap_or_else(|e| error!("Failed to publish to {topic}: {e}"));
    }
}

async fn publish_rejected(
    context: &Arc<Context<Message>>,
    topic: &str,
    hash: BlockHash,
    error: &DAGError,
) {
    warn!(block = %hash, "Block rejected: {error}");
    let message = Arc::new(Message::BlockRejected(BlockRejectedMessage {
        hash,
        reason: error.to_string(),
    }));
    context
        .message_bus
        .publish(topic, message)
        .await
        .unwrap_or_else(|e| error!("Failed to publish to {topic}: {e}"));
}
