#![allow(dead_code)]

use mesh_time::{
    AccessMessage, Address, InboundMessage, MeshTransport, Message, Opcode, ReliableRequest, Role,
    RxMeta, ServerSettings, TimeSetupServer, TransportError,
};

/// Route model logs to the test harness. Set `RUST_LOG=mesh_time=trace`
/// to see every payload.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Group address every node publishes to.
pub const TIME_GROUP: Address = Address(0xC000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Publish(AccessMessage),
    Reply(RxMeta, AccessMessage),
    Request(ReliableRequest),
}

/// Transport that records everything instead of sending it.
#[derive(Debug)]
pub struct RecordingTransport {
    address: Address,
    pub sent: Vec<Sent>,
    pub registered: Vec<(u16, Vec<Opcode>)>,
}

impl RecordingTransport {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            sent: Vec::new(),
            registered: Vec::new(),
        }
    }

    pub fn take(&mut self) -> Vec<Sent> {
        std::mem::take(&mut self.sent)
    }
}

impl MeshTransport for RecordingTransport {
    fn register_handlers(&mut self, model_id: u16, opcodes: &[Opcode]) -> Result<(), TransportError> {
        self.registered.push((model_id, opcodes.to_vec()));
        Ok(())
    }

    fn publish(&mut self, message: &AccessMessage) -> Result<(), TransportError> {
        self.sent.push(Sent::Publish(message.clone()));
        Ok(())
    }

    fn reply(&mut self, request: &RxMeta, message: &AccessMessage) -> Result<(), TransportError> {
        self.sent.push(Sent::Reply(*request, message.clone()));
        Ok(())
    }

    fn reliable_request(&mut self, request: &ReliableRequest) -> Result<(), TransportError> {
        self.sent.push(Sent::Request(request.clone()));
        Ok(())
    }

    fn local_unicast_address(&self) -> Address {
        self.address
    }
}

pub fn decode(message: &AccessMessage) -> Message {
    Message::decode(message.opcode, &message.payload).expect("models only send valid payloads")
}

pub struct Node {
    pub server: TimeSetupServer,
    pub transport: RecordingTransport,
    pub published: Vec<Message>,
    /// TTL of each entry in `published`.
    pub publish_ttls: Vec<Option<u8>>,
}

/// A handful of nodes with radio links between them. Publishes reach every
/// linked node and loop back to the sender.
pub struct Mesh {
    pub nodes: Vec<Node>,
    links: Vec<(usize, usize)>,
}

impl Mesh {
    pub fn new(roles: &[Role], links: &[(usize, usize)]) -> Self {
        init_tracing();
        let nodes = roles
            .iter()
            .enumerate()
            .map(|(index, role)| {
                let mut server = TimeSetupServer::new(ServerSettings::default());
                server.set_role(*role).expect("role publish fits the outbox");
                Node {
                    server,
                    transport: RecordingTransport::new(Address(index as u16 + 1)),
                    published: Vec::new(),
                    publish_ttls: Vec::new(),
                }
            })
            .collect();
        Self {
            nodes,
            links: links.to_vec(),
        }
    }

    /// Nodes `0 - 1 - 2 - ... - n-1`, each only in range of its neighbours.
    pub fn chain(roles: &[Role]) -> Self {
        let links: Vec<_> = (1..roles.len()).map(|i| (i - 1, i)).collect();
        Self::new(roles, &links)
    }

    pub fn address(&self, node: usize) -> Address {
        self.nodes[node].transport.local_unicast_address()
    }

    fn hears(&self, node: usize) -> Vec<usize> {
        let mut listeners = vec![node];
        for &(a, b) in &self.links {
            if a == node {
                listeners.push(b);
            } else if b == node {
                listeners.push(a);
            }
        }
        listeners
    }

    /// Deliver publishes until the network goes quiet. Returns the number of
    /// rounds it took; panics if traffic never stops.
    pub fn run(&mut self) -> usize {
        for round in 0..64 {
            let mut in_flight = Vec::new();
            for (index, node) in self.nodes.iter_mut().enumerate() {
                for sent in node.transport.take() {
                    if let Sent::Publish(message) = sent {
                        node.published.push(decode(&message));
                        node.publish_ttls.push(message.ttl);
                        in_flight.push((index, message));
                    }
                }
            }
            if in_flight.is_empty() {
                return round;
            }

            for (from, message) in in_flight {
                let meta = RxMeta {
                    src: self.address(from),
                    dst: TIME_GROUP,
                };
                for to in self.hears(from) {
                    let inbound = InboundMessage::new(message.opcode, &message.payload, meta);
                    let node = &mut self.nodes[to];
                    // Role Status and friends are not subscribed by the Time Server.
                    let _ = node.server.dispatch(&mut node.transport, &inbound);
                }
            }
        }
        panic!("time status kept circulating");
    }

    /// Drop everything recorded so far.
    pub fn settle(&mut self) {
        for node in &mut self.nodes {
            node.transport.take();
            node.published.clear();
            node.publish_ttls.clear();
        }
    }
}
