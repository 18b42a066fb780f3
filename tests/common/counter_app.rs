//! [`CounterApp`], a simple implementation of [`App`] used in all of the integration tests.

use std::sync::{Arc, Mutex};

use borsh::{BorshDeserialize, BorshSerialize};
use simple_bft::{
    app::{
        App, ApplyBlockRequest, ApplyBlockResponse, ProduceBlockRequest, ProduceBlockResponse,
        ValidateBlockRequest, ValidateBlockResponse,
    },
    types::data_types::{CryptoHash, Data, Datum},
};

/// User-sent instructions that the counter app executes in [`apply_block`](App::apply_block).
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub(crate) enum CounterAppTransaction {
    /// Increase the counter by 1.
    Increment,
}

/// A simple implementation of [`App`] for use in integration tests.
///
/// The counter app maintains an app state consisting of a single number, which is increased by
/// submitting [`Increment`](CounterAppTransaction::Increment) transactions to the app's `tx_queue`.
/// Every block carries a single datum: the borsh-serialized list of the block's transactions.
pub(crate) struct CounterApp {
    tx_queue: Arc<Mutex<Vec<CounterAppTransaction>>>,
    counter: Arc<Mutex<u32>>,
}

impl CounterApp {
    /// Create a new counter app that pops transactions from `tx_queue` and keeps its counter in
    /// `counter`, so that callers can keep references to both.
    pub(crate) fn new(
        tx_queue: Arc<Mutex<Vec<CounterAppTransaction>>>,
        counter: Arc<Mutex<u32>>,
    ) -> CounterApp {
        CounterApp { tx_queue, counter }
    }

    /// The app hash of a counter app whose counter is `counter`.
    pub(crate) fn app_hash(counter: u32) -> CryptoHash {
        CryptoHash::digest(&counter.to_le_bytes())
    }

    fn transactions(data: &Data) -> Option<Vec<CounterAppTransaction>> {
        let datum = data.vec().first()?;
        Vec::<CounterAppTransaction>::try_from_slice(datum.bytes()).ok()
    }
}

impl App for CounterApp {
    fn produce_block(&mut self, _: ProduceBlockRequest) -> ProduceBlockResponse {
        let mut tx_queue = self.tx_queue.lock().unwrap();
        let data = Data::new(vec![Datum::new(tx_queue.try_to_vec().unwrap())]);
        tx_queue.clear();
        ProduceBlockResponse { data }
    }

    fn validate_block(&mut self, request: ValidateBlockRequest) -> ValidateBlockResponse {
        match CounterApp::transactions(&request.block().data) {
            Some(_) => ValidateBlockResponse::Valid,
            None => ValidateBlockResponse::Invalid,
        }
    }

    fn apply_block(&mut self, request: ApplyBlockRequest) -> ApplyBlockResponse {
        let increments = CounterApp::transactions(&request.block().data)
            .map(|transactions| transactions.len() as u32)
            .unwrap_or(0);
        let mut counter = self.counter.lock().unwrap();
        *counter += increments;
        ApplyBlockResponse {
            app_hash: CounterApp::app_hash(*counter),
        }
    }
}
