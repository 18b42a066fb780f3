use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use ed25519_dalek::SigningKey;
use simple_bft::{
    config::Configuration,
    events::{NewBlockEvent, NewRoundEvent, TimeoutProposeEvent},
    messages::{Message, MessageEvent, RoundTriggerEvent},
    replica::{Replica, ReplicaSpec},
    round_state::RoundStateSummary,
    signer::{LocalSigner, LocalValidator},
    types::{
        block::BlockID,
        crypto_primitives::VerifyingKeyBytes,
        data_types::{Height, PeerID, Round},
        state::State,
    },
};

use super::{
    counter_app::{CounterApp, CounterAppTransaction},
    logging::{first_seven_base64_chars, log_with_context},
    mem_store::MemStore,
    network::NetworkStub,
};

/// Things the Nodes will have in common:
/// - Genesis state (and therefore the initial validator set).
/// - Configuration.
///
/// Things that they will differ in:
/// - App instance.
/// - Network instance.
/// - BlockStore.
/// - Keypair.
pub(crate) struct Node {
    verifying_key: VerifyingKeyBytes,
    tx_queue: Arc<Mutex<Vec<CounterAppTransaction>>>,
    counter: Arc<Mutex<u32>>,
    replica: Replica<MemStore>,
}

impl Node {
    pub(crate) fn new(
        keypair: SigningKey,
        network: NetworkStub,
        genesis: State,
        create_empty_blocks: bool,
    ) -> Node {
        let verifying_key = keypair.verifying_key().to_bytes();
        let tx_queue = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(Mutex::new(0));

        let configuration = Configuration::builder()
            .timeout_propose(Duration::from_millis(1000))
            .timeout_prevote(Duration::from_millis(500))
            .timeout_precommit(Duration::from_millis(500))
            .timeout_commit(Duration::from_millis(100))
            .create_empty_blocks(create_empty_blocks)
            .log_events(false)
            .build();

        let replica = ReplicaSpec::builder()
            .block_store(MemStore::new())
            .app(CounterApp::new(tx_queue.clone(), counter.clone()))
            .network(network)
            .validator(LocalValidator::new(LocalSigner::new(keypair)))
            .state(genesis)
            .configuration(configuration)
            .on_new_round(new_round_handler(verifying_key))
            .on_timeout_propose(timeout_propose_handler(verifying_key))
            .on_new_block(new_block_handler(verifying_key))
            .build()
            .start();

        Node {
            verifying_key,
            tx_queue,
            counter,
            replica,
        }
    }

    pub(crate) fn submit_transaction(&self, txn: CounterAppTransaction) {
        self.tx_queue.lock().unwrap().push(txn);
    }

    /// The counter after executing every block committed so far.
    pub(crate) fn counter(&self) -> u32 {
        *self.counter.lock().unwrap()
    }

    /// Height of the last committed block.
    pub(crate) fn committed_height(&self) -> Height {
        self.replica.blockchain().height()
    }

    /// ID of the block committed at `height`, if any.
    pub(crate) fn committed_block_id(&self, height: Height) -> Option<BlockID> {
        self.replica
            .blockchain()
            .load_block_meta(height)
            .map(|meta| meta.block_id)
    }

    pub(crate) fn round_state(&self) -> RoundStateSummary {
        self.replica.round_state_camera().snapshot()
    }

    /// Ask the replica to stop waiting for transactions and propose at `(height, round)`.
    pub(crate) fn trigger_round(&self, height: Height, round: Round) {
        let trigger = Message::new(
            MessageEvent::RoundTrigger(RoundTriggerEvent { height, round }),
            PeerID::LOCAL,
        );
        if let Err(err) = self.replica.message_sender().try_send(trigger) {
            log_with_context(Some(self.verifying_key), &format!("{}", err));
        }
    }
}

fn new_round_handler(verifying_key: VerifyingKeyBytes) -> impl Fn(&NewRoundEvent) + Send + 'static {
    move |new_round_event| {
        log_with_context(
            Some(verifying_key),
            &format!(
                "New Round, height: {}, round: {}, proposer: {}",
                new_round_event.height,
                new_round_event.round,
                new_round_event
                    .proposer
                    .map(|proposer| first_seven_base64_chars(&proposer))
                    .unwrap_or_default()
            ),
        );
    }
}

fn timeout_propose_handler(
    verifying_key: VerifyingKeyBytes,
) -> impl Fn(&TimeoutProposeEvent) + Send + 'static {
    move |timeout_propose_event| {
        log_with_context(
            Some(verifying_key),
            &format!(
                "Propose Timeout, height: {}, round: {}",
                timeout_propose_event.height, timeout_propose_event.round
            ),
        );
    }
}

fn new_block_handler(verifying_key: VerifyingKeyBytes) -> impl Fn(&NewBlockEvent) + Send + 'static {
    move |new_block_event: &NewBlockEvent| {
        log_with_context(
            Some(verifying_key),
            &format!(
                "Committed Block, block hash: {}, height: {}",
                first_seven_base64_chars(&new_block_event.block_id.hash.bytes()),
                new_block_event.block.height()
            ),
        );
    }
}
