use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use ed25519_dalek::VerifyingKey;
use simple_bft::{messages::MessageEvent, networking::Network, types::data_types::PeerID};

/// A mock network stub which passes messages from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_peer_id: PeerID,
    all_peers: HashMap<PeerID, Sender<(PeerID, MessageEvent)>>,
    inbox: Arc<Mutex<Receiver<(PeerID, MessageEvent)>>>,
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: MessageEvent) {
        // Replicas handle their own messages without going through the network.
        for (peer_id, peer) in &self.all_peers {
            if *peer_id != self.my_peer_id {
                let _ = peer.send((self.my_peer_id, message.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(PeerID, MessageEvent)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(origin_and_message) => Some(origin_and_message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(PeerID, Receiver<(PeerID, MessageEvent)>)> = peers
        .map(|peer| {
            let peer_id = PeerID::new(peer.to_bytes());
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer_id, sender);

            (peer_id, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_peer_id, inbox)| NetworkStub {
            my_peer_id,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
