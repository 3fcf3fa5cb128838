//! Fuzz target for arbitrary command sequences across connections
//!
//! Several engines share one broker and receive interleaved frames built from
//! a small vocabulary of destinations, ids and logins so that collisions are
//! frequent.
//!
//! # Invariants
//!
//! - The engine never panics on any input
//! - A login is held by at most one connection
//! - Every delivered MESSAGE carries the receiver's own subscription id
//! - Message ids per topic are strictly increasing for each receiver
//! - After every engine closes, no topic has subscribers and no login is active

#![no_main]

use std::{collections::HashMap, sync::Arc};

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use stomp_proto::Frame;
use stomp_server::{Broker, ClientHandle, ProtocolEngine};
use tokio::sync::mpsc::UnboundedReceiver;

const CLIENTS: usize = 3;
const DESTINATIONS: [&str; 3] = ["/a", "/b", "/c"];
const LOGINS: [&str; 2] = ["alice", "bob"];

#[derive(Debug, Arbitrary)]
enum Op {
    Connect { login: u8, passcode: bool, good_host: bool },
    Subscribe { destination: u8, id: u8, receipt: bool },
    Unsubscribe { id: u8, with_id: bool },
    Send { destination: u8, body: u8, receipt: bool },
    Disconnect { receipt: bool },
    Raw(String),
    Close,
}

#[derive(Debug, Arbitrary)]
struct Step {
    client: u8,
    op: Op,
}

fn render(op: &Op) -> Option<String> {
    let pick = |i: u8, n: usize| usize::from(i) % n;
    let text = match op {
        Op::Connect { login, passcode, good_host } => format!(
            "CONNECT\naccept-version:1.2\nhost:{}\nlogin:{}\npasscode:{}\n\n",
            if *good_host { "stomp.cs.bgu.ac.il" } else { "elsewhere" },
            LOGINS[pick(*login, LOGINS.len())],
            if *passcode { "p" } else { "q" },
        ),
        Op::Subscribe { destination, id, receipt } => format!(
            "SUBSCRIBE\ndestination:{}\nid:{}\n{}\n",
            DESTINATIONS[pick(*destination, DESTINATIONS.len())],
            id % 4,
            if *receipt { "receipt:r\n" } else { "" },
        ),
        Op::Unsubscribe { id, with_id } => {
            if *with_id {
                format!("UNSUBSCRIBE\nid:{}\n\n", id % 4)
            } else {
                "UNSUBSCRIBE\n\n".to_string()
            }
        },
        Op::Send { destination, body, receipt } => format!(
            "SEND\ndestination:{}\n{}\nbody-{body}",
            DESTINATIONS[pick(*destination, DESTINATIONS.len())],
            if *receipt { "receipt:r\n" } else { "" },
        ),
        Op::Disconnect { receipt } => {
            if *receipt {
                "DISCONNECT\nreceipt:r\n\n".to_string()
            } else {
                "DISCONNECT\n\n".to_string()
            }
        },
        Op::Raw(text) => text.clone(),
        Op::Close => return None,
    };
    Some(text)
}

struct Client {
    engine: ProtocolEngine,
    rx: UnboundedReceiver<Bytes>,
    last_ids: HashMap<String, u64>,
}

fuzz_target!(|steps: Vec<Step>| {
    let broker = Arc::new(Broker::default());
    let mut clients: Vec<Client> = (0..CLIENTS)
        .map(|_| {
            let (handle, rx) = ClientHandle::channel();
            Client { engine: broker.accept(handle), rx, last_ids: HashMap::new() }
        })
        .collect();

    for step in steps {
        let client = &mut clients[usize::from(step.client) % CLIENTS];
        match render(&step.op) {
            Some(text) => {
                let _ = client.engine.process(&text);
            },
            None => client.engine.close(),
        }

        for login in LOGINS {
            let holders = clients
                .iter()
                .filter(|c| broker.sessions().active_login(c.engine.connection_id()).as_deref() == Some(login))
                .count();
            assert!(holders <= 1, "login {login} held by {holders} connections");
        }

        for client in &mut clients {
            while let Ok(bytes) = client.rx.try_recv() {
                let text = std::str::from_utf8(&bytes).expect("outbound frames are utf-8");
                let frame = Frame::parse(text).expect("outbound frames parse");
                assert_eq!(frame.command, "MESSAGE");

                let destination = frame.header("destination").expect("destination").to_string();
                let subscription = frame.header("subscription").expect("subscription");
                let topic = broker.topics().get(&destination).expect("topic exists");
                if let Some(current) = topic.subscription_id(client.engine.connection_id()) {
                    assert_eq!(current, subscription);
                }

                let id: u64 = frame.header("message-id").expect("id").parse().expect("numeric id");
                let last = client.last_ids.entry(destination).or_insert(0);
                assert!(id > *last);
                *last = id;
            }
        }
    }

    for client in &mut clients {
        client.engine.close();
    }
    for topic in broker.topics().all() {
        assert_eq!(topic.subscriber_count(), 0);
    }
    assert_eq!(broker.sessions().active_count(), 0);
});
