/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;

use super::*;
use crate::app::{
    ApplyBlockRequest, ApplyBlockResponse, ProduceBlockRequest, ProduceBlockResponse,
    ValidateBlockRequest, ValidateBlockResponse,
};
use crate::config::Timeouts;
use crate::events::{NewBlockEvent, ValidBlockEvent};
use crate::messages::{message_queue, BlockPartEvent};
use crate::signer::{LocalSigner, LocalValidator};
use crate::types::{
    block::{Block, BlockID, BlockMeta, PartSetHeader},
    commit::Commit,
    data_types::{ChainID, CryptoHash, Data, Datum, Power},
    part_set::{PartSet, BLOCK_PART_SIZE_BYTES},
    proposal::Proposal,
    validator_set::ValidatorSet,
    vote::{SignedMsgType, Vote},
};

const CHAIN_ID: ChainID = ChainID::new(7);
const INITIAL_HEIGHT: Height = Height::new(10);

#[derive(Default)]
struct MemStoreContents {
    blocks: BTreeMap<Height, Block>,
    block_metas: BTreeMap<Height, BlockMeta>,
    seen_commits: BTreeMap<Height, Commit>,
}

#[derive(Clone, Default)]
struct MemStore(Arc<Mutex<MemStoreContents>>);

impl MemStore {
    fn insert_block_meta(&self, meta: BlockMeta) {
        let mut contents = self.0.lock().unwrap();
        contents.block_metas.insert(meta.header.height, meta);
    }
}

impl BlockStore for MemStore {
    fn height(&self) -> Height {
        let contents = self.0.lock().unwrap();
        contents
            .blocks
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Height::new(0))
    }

    fn load_block(&self, height: Height) -> Option<Block> {
        self.0.lock().unwrap().blocks.get(&height).cloned()
    }

    fn load_block_meta(&self, height: Height) -> Option<BlockMeta> {
        self.0.lock().unwrap().block_metas.get(&height).cloned()
    }

    fn load_block_commit(&self, height: Height) -> Option<Commit> {
        let contents = self.0.lock().unwrap();
        contents
            .blocks
            .get(&(height + 1))
            .and_then(|block| block.last_commit.clone())
    }

    fn load_seen_commit(&self, height: Height) -> Option<Commit> {
        self.0.lock().unwrap().seen_commits.get(&height).cloned()
    }

    fn save_block(&mut self, block: &Block, parts: &PartSet, seen_commit: &Commit) {
        let mut contents = self.0.lock().unwrap();
        let height = block.height();
        contents.blocks.insert(height, block.clone());
        contents
            .block_metas
            .insert(height, BlockMeta::new(block, parts.header()));
        contents.seen_commits.insert(height, seen_commit.clone());
    }
}

struct AcceptAllApp;

impl App for AcceptAllApp {
    fn produce_block(&mut self, request: ProduceBlockRequest) -> ProduceBlockResponse {
        ProduceBlockResponse {
            data: Data::new(vec![Datum::new(
                request.height().int().to_le_bytes().to_vec(),
            )]),
        }
    }

    fn validate_block(&mut self, _: ValidateBlockRequest) -> ValidateBlockResponse {
        ValidateBlockResponse::Valid
    }

    fn apply_block(&mut self, request: ApplyBlockRequest) -> ApplyBlockResponse {
        ApplyBlockResponse {
            app_hash: CryptoHash::digest(&request.block().hash().bytes()),
        }
    }
}

#[derive(Clone, Default)]
struct RecordingNetwork(Arc<Mutex<Vec<MessageEvent>>>);

impl Network for RecordingNetwork {
    fn broadcast(&mut self, message: MessageEvent) {
        self.0.lock().unwrap().push(message)
    }

    fn recv(&mut self) -> Option<(PeerID, MessageEvent)> {
        None
    }
}

type TestStateMachine =
    StateMachine<MemStore, AcceptAllApp, RecordingNetwork, LocalValidator<LocalSigner>>;

struct Fixture {
    state_machine: TestStateMachine,
    events: Receiver<Event>,
    store: MemStore,
    network: RecordingNetwork,
    genesis: State,
}

fn signing_keys(n: usize) -> Vec<SigningKey> {
    let mut csprng = OsRng;
    (0..n).map(|_| SigningKey::generate(&mut csprng)).collect()
}

fn configuration() -> StateMachineConfiguration {
    StateMachineConfiguration {
        timeouts: Timeouts {
            propose: Duration::from_millis(3000),
            propose_delta: Duration::from_millis(500),
            prevote: Duration::from_millis(1000),
            prevote_delta: Duration::from_millis(500),
            precommit: Duration::from_millis(1000),
            precommit_delta: Duration::from_millis(500),
            commit: Duration::from_millis(1000),
        },
        wait_for_txs: false,
        create_empty_blocks_interval: Duration::ZERO,
        future_msg_buffer_capacity: 16,
    }
}

// A state machine for a chain validated by `validators` with equal power, signing with `me`.
fn fixture(validators: &[SigningKey], me: SigningKey) -> Fixture {
    fixture_with(equal_power_set(validators), me, configuration())
}

fn fixture_with(
    validator_set: ValidatorSet,
    me: SigningKey,
    configuration: StateMachineConfiguration,
) -> Fixture {
    let genesis = State::genesis(
        CHAIN_ID,
        INITIAL_HEIGHT,
        CryptoHash::digest(b"genesis"),
        validator_set,
    );
    let store = MemStore::default();
    let network = RecordingNetwork::default();
    let (_, messages) = message_queue(16);
    let (event_publisher, events) = mpsc::channel();

    let state_machine = StateMachine::new(
        configuration,
        genesis.clone(),
        Blockchain::new(store.clone()),
        AcceptAllApp,
        network.clone(),
        LocalValidator::new(LocalSigner::new(me)),
        messages,
        Some(event_publisher),
    );

    Fixture {
        state_machine,
        events,
        store,
        network,
        genesis,
    }
}

fn equal_power_set(validators: &[SigningKey]) -> ValidatorSet {
    ValidatorSet::new(
        validators
            .iter()
            .map(|key| (key.verifying_key(), Power::new(1)))
            .collect(),
    )
}

// The key of the proposer of round 0 of the first height.
fn proposer_key(keys: &[SigningKey], state: &State) -> SigningKey {
    key_of(keys, state.validators.proposer().unwrap().verifying_key)
}

fn drain(events: &Receiver<Event>) -> Vec<Event> {
    events.try_iter().collect()
}

fn some_block_id() -> BlockID {
    BlockID {
        hash: CryptoHash::digest(b"block"),
        part_set_header: PartSetHeader {
            total: 1,
            hash: CryptoHash::digest(b"parts"),
        },
    }
}

fn proposal_with_block(
    state: &State,
    proposer: &SigningKey,
    round: Round,
) -> (Proposal, Block, PartSet) {
    let block = state.make_block(
        INITIAL_HEIGHT,
        Data::new(vec![Datum::new(vec![1, 2, 3])]),
        None,
        proposer.verifying_key().to_bytes(),
    );
    let parts = block.make_part_set(BLOCK_PART_SIZE_BYTES);
    let proposal = LocalValidator::new(LocalSigner::new(proposer.clone()))
        .create_proposal(
            CHAIN_ID,
            INITIAL_HEIGHT,
            round,
            Round::NONE,
            block.block_id(parts.header()),
        )
        .unwrap();
    (proposal, block, parts)
}

fn peer(key: &SigningKey) -> PeerID {
    PeerID::new(key.verifying_key().to_bytes())
}

fn key_of(keys: &[SigningKey], verifying_key: VerifyingKey) -> SigningKey {
    keys.iter()
        .find(|key| key.verifying_key() == verifying_key)
        .unwrap()
        .clone()
}

// The key of the proposer of `round` of the first height.
fn proposer_at(keys: &[SigningKey], validator_set: &ValidatorSet, round: u32) -> SigningKey {
    let rotated = match round {
        0 => validator_set.clone(),
        _ => validator_set.copy_increment_proposer_priority(round),
    };
    key_of(keys, rotated.proposer().unwrap().verifying_key)
}

fn current_proposer(keys: &[SigningKey], state_machine: &TestStateMachine) -> SigningKey {
    key_of(
        keys,
        state_machine.round_state.proposer().unwrap().verifying_key,
    )
}

// Four validators of which `me` is the proposer of round 3 only.
fn validator_fixture() -> (Vec<SigningKey>, SigningKey, Vec<SigningKey>, Fixture) {
    let keys = signing_keys(4);
    let me = proposer_at(&keys, &equal_power_set(&keys), 3);
    let peers = keys
        .iter()
        .filter(|key| key.verifying_key() != me.verifying_key())
        .cloned()
        .collect();
    let fixture = fixture(&keys, me.clone());
    (keys, me, peers, fixture)
}

// A block for the first height whose data is `byte`.
fn block_and_parts(state: &State, proposer: &SigningKey, byte: u8) -> (Block, PartSet, BlockID) {
    let block = state.make_block(
        INITIAL_HEIGHT,
        Data::new(vec![Datum::new(vec![byte])]),
        None,
        proposer.verifying_key().to_bytes(),
    );
    let parts = block.make_part_set(BLOCK_PART_SIZE_BYTES);
    let block_id = block.block_id(parts.header());
    (block, parts, block_id)
}

fn signed_proposal(
    proposer: &SigningKey,
    round: Round,
    pol_round: Round,
    block_id: BlockID,
) -> Proposal {
    LocalValidator::new(LocalSigner::new(proposer.clone()))
        .create_proposal(CHAIN_ID, INITIAL_HEIGHT, round, pol_round, block_id)
        .unwrap()
}

fn receive_proposal(
    state_machine: &mut TestStateMachine,
    proposer: &SigningKey,
    proposal: Proposal,
    parts: &PartSet,
) {
    let round = proposal.round;
    state_machine
        .handle_msg(Message::new(MessageEvent::from(proposal), peer(proposer)))
        .unwrap();
    for index in 0..parts.total() {
        let part_event = MessageEvent::BlockPart(BlockPartEvent {
            height: INITIAL_HEIGHT,
            round,
            part: parts.get_part(index).unwrap().clone(),
        });
        state_machine
            .handle_msg(Message::new(part_event, peer(proposer)))
            .unwrap();
    }
}

fn receive_votes(
    state_machine: &mut TestStateMachine,
    voters: &[SigningKey],
    vote_type: SignedMsgType,
    round: Round,
    block_id: Option<BlockID>,
) {
    for voter in voters {
        let index = state_machine
            .round_state
            .validators
            .position(&voter.verifying_key())
            .unwrap();
        let mut vote = Vote::new(
            vote_type,
            INITIAL_HEIGHT,
            round,
            block_id,
            voter.verifying_key().to_bytes(),
            index as i32,
        );
        LocalValidator::new(LocalSigner::new(voter.clone()))
            .sign_vote(CHAIN_ID, &mut vote)
            .unwrap();
        state_machine
            .handle_msg(Message::new(MessageEvent::from(vote), peer(voter)))
            .unwrap();
    }
}

// What this replica voted for with votes of `vote_type` at `round`.
fn own_votes(
    network: &RecordingNetwork,
    vote_type: SignedMsgType,
    round: Round,
) -> Vec<Option<BlockID>> {
    network
        .0
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            MessageEvent::Vote(VoteEvent { vote })
                if vote.vote_type == vote_type && vote.round == round =>
            {
                Some(vote.block_id)
            }
            _ => None,
        })
        .collect()
}

// Receive a proposal at round 0 and a polka for it, so that this replica locks on it.
fn lock_at_round_0(
    keys: &[SigningKey],
    peers: &[SigningKey],
    fixture: &mut Fixture,
) -> (Block, BlockID) {
    let state_machine = &mut fixture.state_machine;
    state_machine.new_round(INITIAL_HEIGHT, Round::new(0));
    let proposer = current_proposer(keys, state_machine);
    let (block, parts, block_id) = block_and_parts(&fixture.genesis, &proposer, 1);

    receive_proposal(
        state_machine,
        &proposer,
        signed_proposal(&proposer, Round::new(0), Round::NONE, block_id),
        &parts,
    );
    state_machine.process_internal_queue();
    receive_votes(state_machine, peers, SignedMsgType::Prevote, Round::new(0), Some(block_id));
    state_machine.process_internal_queue();

    assert_eq!(state_machine.round_state.locked_round, Round::new(0));
    assert_eq!(state_machine.round_state.locked_block, Some(block.clone()));
    (block, block_id)
}

fn waiting_configuration(create_empty_blocks_interval: Duration) -> StateMachineConfiguration {
    StateMachineConfiguration {
        wait_for_txs: true,
        create_empty_blocks_interval,
        ..configuration()
    }
}

// Make the first height one that does not need a proof block, then start its round 0.
fn start_non_proof_height(fixture: &mut Fixture, proposer: &SigningKey) {
    let state_machine = &mut fixture.state_machine;
    state_machine.state.initial_height = INITIAL_HEIGHT - 1;
    let previous = state_machine.state.make_block(
        INITIAL_HEIGHT - 1,
        Data::default(),
        None,
        proposer.verifying_key().to_bytes(),
    );
    let parts = previous.make_part_set(BLOCK_PART_SIZE_BYTES);
    fixture
        .store
        .insert_block_meta(BlockMeta::new(&previous, parts.header()));
    state_machine.new_round(INITIAL_HEIGHT, Round::new(0));
}

fn round_trigger(height: Height, round: Round) -> Message {
    Message::new(
        MessageEvent::RoundTrigger(RoundTriggerEvent { height, round }),
        PeerID::LOCAL,
    )
}

struct WarningLog(Mutex<Vec<String>>);

impl log::Log for WarningLog {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Warn
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.0.lock().unwrap().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static WARNINGS: WarningLog = WarningLog(Mutex::new(Vec::new()));

// Collect warnings and errors logged by any test in this process.
fn capture_warnings() {
    let _ = log::set_logger(&WARNINGS);
    log::set_max_level(log::LevelFilter::Warn);
}

#[test]
fn propose_timeout_moves_to_prevote() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine,
        events,
        ..
    } = fixture(&keys, signing_keys(1).remove(0));

    state_machine.new_round(INITIAL_HEIGHT, Round::new(0));
    assert_eq!(state_machine.round_state.step, RoundStep::Propose);
    drain(&events);

    let timeout = RoundEvent::new(
        Duration::from_millis(3000),
        INITIAL_HEIGHT,
        Round::new(0),
        RoundStep::Propose,
    );
    state_machine.handle_timeout(timeout);
    // Already in Prevote, so the same timeout is now stale.
    state_machine.handle_timeout(timeout);

    let timeouts = drain(&events)
        .into_iter()
        .filter(|event| matches!(event, Event::TimeoutPropose(_)))
        .count();
    assert_eq!(timeouts, 1);
    assert_eq!(state_machine.round_state.round, Round::new(0));
    assert_eq!(state_machine.round_state.step, RoundStep::Prevote);
}

#[test]
fn precommit_timeout_starts_next_round() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine,
        events,
        ..
    } = fixture(&keys, signing_keys(1).remove(0));

    state_machine.new_round(INITIAL_HEIGHT, Round::new(1));
    drain(&events);

    state_machine.handle_timeout(RoundEvent::new(
        Duration::from_millis(1500),
        INITIAL_HEIGHT,
        Round::new(1),
        RoundStep::Precommit,
    ));

    let events = drain(&events);
    let timeout_waits = events
        .iter()
        .filter(|event| matches!(event, Event::TimeoutWait(_)))
        .count();
    assert_eq!(timeout_waits, 1);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::NewRoundStep(NewRoundStepEvent { height, round, step: RoundStep::NewHeight, .. })
            if *height == INITIAL_HEIGHT && *round == Round::new(2)
    )));
    assert_eq!(state_machine.round_state.round, Round::new(2));
    assert_eq!(state_machine.round_state.step, RoundStep::Propose);
}

#[test]
fn timeouts_for_past_heights_are_ignored() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine,
        events,
        ..
    } = fixture(&keys, signing_keys(1).remove(0));

    state_machine.new_round(INITIAL_HEIGHT, Round::new(0));
    drain(&events);

    state_machine.handle_timeout(RoundEvent::new(
        Duration::from_millis(3000),
        INITIAL_HEIGHT - 1,
        Round::new(0),
        RoundStep::Propose,
    ));

    assert!(drain(&events).is_empty());
    assert_eq!(state_machine.round_state.step, RoundStep::Propose);
}

#[test]
fn new_round_clears_proposal_only_after_round_0() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine, ..
    } = fixture(&keys, signing_keys(1).remove(0));
    let proposal = Proposal::new(INITIAL_HEIGHT, Round::new(0), Round::NONE, some_block_id());

    state_machine.round_state.proposal = Some(proposal.clone());
    state_machine.new_round(INITIAL_HEIGHT, Round::new(0));
    assert_eq!(state_machine.round_state.proposal, Some(proposal.clone()));

    state_machine.new_round(INITIAL_HEIGHT, Round::new(1));
    assert_eq!(state_machine.round_state.proposal, None);
    assert_eq!(state_machine.round_state.proposal_block_parts, None);
}

#[test]
fn new_round_rotates_a_copy_of_the_validator_set() {
    let keys = signing_keys(4);
    let validator_set = ValidatorSet::new(
        keys.iter()
            .zip(1..)
            .map(|(key, power)| (key.verifying_key(), Power::new(power)))
            .collect(),
    );
    let Fixture {
        mut state_machine,
        genesis,
        ..
    } = fixture_with(validator_set, signing_keys(1).remove(0), configuration());
    let pre = state_machine.round_state.validators.clone();

    state_machine.new_round(INITIAL_HEIGHT, Round::new(1));
    let after_round_1 = pre.copy_increment_proposer_priority(1);
    assert_eq!(state_machine.round_state.validators, after_round_1);

    // Advances by the number of rounds skipped, relative to the previous round.
    state_machine.new_round(INITIAL_HEIGHT, Round::new(4));
    assert_eq!(
        state_machine.round_state.validators,
        after_round_1.copy_increment_proposer_priority(3)
    );

    assert_eq!(pre, genesis.validators);
    assert_eq!(state_machine.state.validators, genesis.validators);
}

#[test]
fn need_proof_block_cases() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine,
        store,
        ..
    } = fixture(&keys, signing_keys(1).remove(0));

    // First block of the chain.
    assert!(state_machine.need_proof_block(INITIAL_HEIGHT));

    // No record of the previous block.
    let next = INITIAL_HEIGHT + 2;
    assert!(state_machine.need_proof_block(next));

    let previous = state_machine.state.make_block(
        INITIAL_HEIGHT + 1,
        Data::default(),
        None,
        keys[0].verifying_key().to_bytes(),
    );
    let parts = previous.make_part_set(BLOCK_PART_SIZE_BYTES);
    store.insert_block_meta(BlockMeta::new(&previous, parts.header()));

    // Previous block was built on the current app hash.
    assert!(!state_machine.need_proof_block(next));

    // The app hash changed since.
    state_machine.state.app_hash = CryptoHash::digest(b"changed");
    assert!(state_machine.need_proof_block(next));
}

#[test]
fn proposal_with_invalid_signature_is_rejected() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine,
        genesis,
        ..
    } = fixture(&keys, signing_keys(1).remove(0));
    let proposer = proposer_key(&keys, &genesis);
    let impostor = keys
        .iter()
        .find(|key| key.verifying_key() != proposer.verifying_key())
        .unwrap();

    let (proposal, _, _) = proposal_with_block(&genesis, impostor, Round::new(0));
    let result = state_machine.handle_msg(Message::new(
        MessageEvent::from(proposal),
        PeerID::new(impostor.verifying_key().to_bytes()),
    ));

    assert!(matches!(result, Err(ConsensusError::InvalidProposalSignature)));
    assert!(state_machine.round_state.proposal.is_none());
    assert!(state_machine.round_state.proposal_block_parts.is_none());
}

#[test]
fn proposal_with_pol_round_not_before_its_round_is_rejected() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine,
        genesis,
        ..
    } = fixture(&keys, signing_keys(1).remove(0));
    let proposer = proposer_key(&keys, &genesis);

    let proposal = LocalValidator::new(LocalSigner::new(proposer.clone()))
        .create_proposal(
            CHAIN_ID,
            INITIAL_HEIGHT,
            Round::new(0),
            Round::new(0),
            some_block_id(),
        )
        .unwrap();

    assert!(matches!(
        state_machine.set_proposal(proposal),
        Err(ConsensusError::InvalidProposalPOLRound)
    ));
    assert!(state_machine.round_state.proposal.is_none());
}

#[test]
fn duplicate_block_parts_complete_the_proposal_once() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine,
        events,
        genesis,
        ..
    } = fixture(&keys, signing_keys(1).remove(0));
    let proposer = proposer_key(&keys, &genesis);
    let (proposal, block, parts) = proposal_with_block(&genesis, &proposer, Round::new(0));

    state_machine
        .handle_msg(Message::new(
            MessageEvent::from(proposal),
            PeerID::new(proposer.verifying_key().to_bytes()),
        ))
        .unwrap();

    let part_event = |index| BlockPartEvent {
        height: INITIAL_HEIGHT,
        round: Round::new(0),
        part: parts.get_part(index).unwrap().clone(),
    };
    for index in 0..parts.total() {
        assert_eq!(state_machine.add_proposal_block_part(part_event(index)), Ok(true));
    }
    assert_eq!(state_machine.add_proposal_block_part(part_event(0)), Ok(false));

    let complete_proposals = drain(&events)
        .into_iter()
        .filter(|event| matches!(event, Event::CompleteProposal(_)))
        .count();
    assert_eq!(complete_proposals, 1);
    assert_eq!(state_machine.round_state.proposal_block, Some(block));
    assert_eq!(state_machine.round_state.step, RoundStep::Prevote);
}

#[test]
fn conflicting_votes_are_reported() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine,
        events,
        ..
    } = fixture(&keys, signing_keys(1).remove(0));
    let voter = &keys[0];
    let validator_index = state_machine
        .round_state
        .validators
        .position(&voter.verifying_key())
        .unwrap() as i32;
    let signer = LocalValidator::new(LocalSigner::new(voter.clone()));
    let vote = |block_id| {
        let mut vote = Vote::new(
            SignedMsgType::Prevote,
            INITIAL_HEIGHT,
            Round::new(0),
            block_id,
            voter.verifying_key().to_bytes(),
            validator_index,
        );
        signer.sign_vote(CHAIN_ID, &mut vote).unwrap();
        vote
    };
    let peer = PeerID::new(voter.verifying_key().to_bytes());

    assert_eq!(state_machine.add_vote(vote(Some(some_block_id())), peer), Ok(true));
    assert_eq!(
        state_machine.add_vote(vote(None), peer),
        Err(ConsensusError::SignatureFoundInPastBlocks { validator_index })
    );
    assert!(drain(&events)
        .iter()
        .any(|event| matches!(event, Event::Equivocation(_))));
}

#[test]
fn single_validator_commits_a_height() {
    let keys = signing_keys(1);
    let Fixture {
        mut state_machine,
        events,
        store,
        network,
        ..
    } = fixture(&keys, keys[0].clone());

    state_machine.new_round(INITIAL_HEIGHT, Round::new(0));
    state_machine.process_internal_queue();

    assert_eq!(store.height(), INITIAL_HEIGHT);
    assert!(store.load_seen_commit(INITIAL_HEIGHT).is_some());
    assert_eq!(state_machine.round_state.height, INITIAL_HEIGHT + 1);
    assert_eq!(state_machine.round_state.step, RoundStep::NewHeight);
    assert!(state_machine.round_state.last_commit.is_some());
    assert_eq!(state_machine.state.last_block_height, INITIAL_HEIGHT);

    let events = drain(&events);
    assert!(events.iter().any(|event| matches!(event, Event::Lock(_))));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::NewBlock(NewBlockEvent { block, .. }) if block.height() == INITIAL_HEIGHT
    )));

    // Proposal, one part, one prevote, one precommit.
    let broadcast = network.0.lock().unwrap();
    assert!(matches!(broadcast[0], MessageEvent::Proposal(_)));
    assert_eq!(broadcast.len(), 4);
}

#[test]
fn single_validator_builds_on_its_last_commit() {
    let keys = signing_keys(1);
    let Fixture {
        mut state_machine,
        store,
        ..
    } = fixture(&keys, keys[0].clone());

    for _ in 0..3 {
        let height = state_machine.round_state.height;
        state_machine.new_round(height, Round::new(0));
        state_machine.process_internal_queue();
    }

    assert_eq!(store.height(), INITIAL_HEIGHT + 2);
    let last_block = store.load_block(INITIAL_HEIGHT + 2).unwrap();
    assert_eq!(
        last_block.last_commit.map(|commit| commit.height),
        Some(INITIAL_HEIGHT + 1)
    );
    assert_eq!(
        store.load_block_commit(INITIAL_HEIGHT + 1).map(|commit| commit.height),
        Some(INITIAL_HEIGHT + 1)
    );
}

#[test]
fn votes_for_the_next_height_are_replayed_after_commit() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine,
        genesis,
        ..
    } = fixture(&keys, signing_keys(1).remove(0));
    let voter = &keys[0];
    let validator_index = state_machine
        .round_state
        .validators
        .position(&voter.verifying_key())
        .unwrap() as i32;
    let mut vote = Vote::new(
        SignedMsgType::Prevote,
        INITIAL_HEIGHT + 1,
        Round::new(0),
        None,
        voter.verifying_key().to_bytes(),
        validator_index,
    );
    LocalValidator::new(LocalSigner::new(voter.clone()))
        .sign_vote(CHAIN_ID, &mut vote)
        .unwrap();

    // 1. A vote from a replica that is already a height ahead is held back.
    state_machine
        .handle_msg(Message::new(
            MessageEvent::from(vote.clone()),
            PeerID::new(voter.verifying_key().to_bytes()),
        ))
        .unwrap();
    assert_eq!(state_machine.future_messages.len(), 1);
    assert!(state_machine.internal_queue.is_empty());

    // 2. Moving to the next height replays it.
    let proposer = proposer_key(&keys, &genesis);
    let (_, block, parts) = proposal_with_block(&genesis, &proposer, Round::new(0));
    let next_state = genesis.next(
        &block,
        block.block_id(parts.header()),
        CryptoHash::digest(b"next"),
    );
    state_machine.update_to_state(next_state);
    assert_eq!(state_machine.future_messages.len(), 0);
    state_machine.process_internal_queue();

    let prevotes = state_machine.round_state.votes.prevotes(Round::new(0)).unwrap();
    assert_eq!(prevotes.get_by_index(validator_index as usize), Some(&vote));
}

#[test]
fn new_round_before_start_time_warns() {
    capture_warnings();
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine, ..
    } = fixture(&keys, signing_keys(1).remove(0));
    assert!(state_machine.round_state.start_time > SystemTime::now());

    state_machine.new_round(INITIAL_HEIGHT, Round::new(0));

    let expected = format!(
        "new_round({}/{}) called before the height's start time",
        INITIAL_HEIGHT,
        Round::new(0)
    );
    assert!(WARNINGS.0.lock().unwrap().contains(&expected));
    assert_eq!(state_machine.round_state.step, RoundStep::Propose);
}

#[test]
fn non_proof_height_waits_until_new_height_timeout() {
    let keys = signing_keys(4);
    let mut fixture = fixture_with(
        equal_power_set(&keys),
        signing_keys(1).remove(0),
        waiting_configuration(Duration::from_millis(50)),
    );
    fixture.state_machine.ticker.start().unwrap();

    start_non_proof_height(&mut fixture, &keys[0]);
    let state_machine = &mut fixture.state_machine;
    assert_eq!(state_machine.round_state.step, RoundStep::NewHeight);
    assert!(state_machine.round_state.waiting_for_txs);

    // The create-empty-blocks interval is armed as a NewHeight timeout of round 0.
    let fired = state_machine
        .ticker
        .tock_chan()
        .recv_timeout(Duration::from_secs(5))
        .unwrap();
    assert_eq!(
        (fired.height, fired.round, fired.step),
        (INITIAL_HEIGHT, Round::new(0), RoundStep::NewHeight)
    );

    state_machine.handle_timeout(fired);
    assert_eq!(state_machine.round_state.round, Round::new(0));
    assert_eq!(state_machine.round_state.step, RoundStep::Propose);
    assert!(!state_machine.round_state.waiting_for_txs);
}

#[test]
fn proof_block_height_does_not_wait_for_transactions() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine, ..
    } = fixture_with(
        equal_power_set(&keys),
        signing_keys(1).remove(0),
        waiting_configuration(Duration::ZERO),
    );

    state_machine.new_round(INITIAL_HEIGHT, Round::new(0));

    assert_eq!(state_machine.round_state.step, RoundStep::Propose);
    assert!(!state_machine.round_state.waiting_for_txs);
}

#[test]
fn round_trigger_only_starts_the_waiting_round() {
    let keys = signing_keys(4);
    let mut fixture = fixture_with(
        equal_power_set(&keys),
        signing_keys(1).remove(0),
        waiting_configuration(Duration::ZERO),
    );
    start_non_proof_height(&mut fixture, &keys[0]);
    let state_machine = &mut fixture.state_machine;

    for (height, round) in [
        (INITIAL_HEIGHT, Round::new(1)),
        (INITIAL_HEIGHT - 1, Round::new(0)),
        (INITIAL_HEIGHT + 1, Round::new(0)),
    ] {
        state_machine.handle_msg(round_trigger(height, round)).unwrap();
        assert_eq!(state_machine.round_state.round, Round::new(0));
        assert_eq!(state_machine.round_state.step, RoundStep::NewHeight);
    }

    state_machine
        .handle_msg(round_trigger(INITIAL_HEIGHT, Round::new(0)))
        .unwrap();
    assert_eq!(state_machine.round_state.step, RoundStep::Propose);
}

#[test]
fn locked_replica_prevotes_nil_for_another_block() {
    let (keys, _, peers, mut fixture) = validator_fixture();
    lock_at_round_0(&keys, &peers, &mut fixture);
    let Fixture {
        state_machine,
        network,
        genesis,
        ..
    } = &mut fixture;

    state_machine.new_round(INITIAL_HEIGHT, Round::new(1));
    let proposer = current_proposer(&keys, state_machine);
    let (_, parts, block_id) = block_and_parts(genesis, &proposer, 2);
    receive_proposal(
        state_machine,
        &proposer,
        signed_proposal(&proposer, Round::new(1), Round::NONE, block_id),
        &parts,
    );

    assert_eq!(state_machine.round_state.step, RoundStep::Prevote);
    assert_eq!(own_votes(network, SignedMsgType::Prevote, Round::new(1)), vec![None]);
    assert_eq!(state_machine.round_state.locked_round, Round::new(0));
}

#[test]
fn locked_replica_follows_a_later_polka() {
    let (keys, me, peers, mut fixture) = validator_fixture();
    lock_at_round_0(&keys, &peers, &mut fixture);
    let Fixture {
        state_machine,
        network,
        genesis,
        ..
    } = &mut fixture;
    let (_, parts, block_id) = block_and_parts(genesis, &keys[0], 2);

    // 1. The other validators prevote the new block at round 1.
    state_machine.new_round(INITIAL_HEIGHT, Round::new(1));
    receive_votes(state_machine, &peers, SignedMsgType::Prevote, Round::new(1), Some(block_id));

    // 2. Round 2 re-proposes it, citing the polka of round 1.
    state_machine.new_round(INITIAL_HEIGHT, Round::new(2));
    let proposer = current_proposer(&keys, state_machine);
    assert_ne!(proposer.verifying_key(), me.verifying_key());
    receive_proposal(
        state_machine,
        &proposer,
        signed_proposal(&proposer, Round::new(2), Round::new(1), block_id),
        &parts,
    );

    assert_eq!(
        own_votes(network, SignedMsgType::Prevote, Round::new(2)),
        vec![Some(block_id)]
    );
}

#[test]
fn polka_for_the_held_proposal_updates_the_valid_block() {
    let keys = signing_keys(4);
    let Fixture {
        mut state_machine,
        events,
        genesis,
        ..
    } = fixture(&keys, signing_keys(1).remove(0));

    state_machine.new_round(INITIAL_HEIGHT, Round::new(0));
    let proposer = current_proposer(&keys, &state_machine);
    let (block, parts, block_id) = block_and_parts(&genesis, &proposer, 1);
    receive_proposal(
        &mut state_machine,
        &proposer,
        signed_proposal(&proposer, Round::new(0), Round::NONE, block_id),
        &parts,
    );
    assert_eq!(state_machine.round_state.valid_round, Round::NONE);
    drain(&events);

    receive_votes(
        &mut state_machine,
        &keys[0..3],
        SignedMsgType::Prevote,
        Round::new(0),
        Some(block_id),
    );

    assert_eq!(state_machine.round_state.valid_round, Round::new(0));
    assert_eq!(state_machine.round_state.valid_block, Some(block));
    assert!(drain(&events).iter().any(|event| matches!(
        event,
        Event::ValidBlock(ValidBlockEvent { round, block_id: valid, .. })
            if *round == Round::new(0) && *valid == block_id
    )));
}

#[test]
fn polka_for_an_unknown_block_precommits_nil() {
    let (keys, _, peers, mut fixture) = validator_fixture();
    let Fixture {
        state_machine,
        network,
        genesis,
        ..
    } = &mut fixture;
    let (_, _, block_id) = block_and_parts(genesis, &keys[0], 3);

    // 1. No proposal arrives, so this replica prevotes nil.
    state_machine.new_round(INITIAL_HEIGHT, Round::new(0));
    state_machine.handle_timeout(RoundEvent::new(
        Duration::from_millis(3000),
        INITIAL_HEIGHT,
        Round::new(0),
        RoundStep::Propose,
    ));
    state_machine.process_internal_queue();
    assert_eq!(own_votes(network, SignedMsgType::Prevote, Round::new(0)), vec![None]);

    // 2. Everyone else prevotes a block this replica has never seen.
    receive_votes(state_machine, &peers, SignedMsgType::Prevote, Round::new(0), Some(block_id));
    state_machine.handle_timeout(RoundEvent::new(
        Duration::from_millis(1000),
        INITIAL_HEIGHT,
        Round::new(0),
        RoundStep::Prevote,
    ));

    assert_eq!(state_machine.round_state.step, RoundStep::Precommit);
    assert_eq!(own_votes(network, SignedMsgType::Precommit, Round::new(0)), vec![None]);
    assert_eq!(state_machine.round_state.locked_round, Round::NONE);
    assert!(state_machine.round_state.proposal_block.is_none());
    assert!(state_machine
        .round_state
        .proposal_block_parts
        .as_ref()
        .unwrap()
        .has_header(&block_id.part_set_header));
}

#[test]
fn proposer_re_proposes_its_valid_block() {
    let (keys, me, peers, mut fixture) = validator_fixture();
    let (_, block_id) = lock_at_round_0(&keys, &peers, &mut fixture);
    let Fixture {
        state_machine,
        network,
        ..
    } = &mut fixture;
    assert_eq!(state_machine.round_state.valid_round, Round::new(0));

    state_machine.new_round(INITIAL_HEIGHT, Round::new(3));
    assert_eq!(
        current_proposer(&keys, state_machine).verifying_key(),
        me.verifying_key()
    );

    let proposals: Vec<Proposal> = network
        .0
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            MessageEvent::Proposal(ProposalEvent { proposal }) => Some(proposal.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].round, Round::new(3));
    assert_eq!(proposals[0].pol_round, Round::new(0));
    assert_eq!(proposals[0].block_id, block_id);
}
