//! A minimal radio simulator: nodes only hear neighbours named in the
//! adjacency map, broadcasts fan out to those neighbours, and unicasts are
//! delivered only if the target is actually in range.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use styrene_mesh_route::{
    Addr, Collaborators, CtlOp, Engine, NetIdx, RouteEngineConfig, RouteError, RxMeta, SeqNum,
    BROADCAST_ADDR,
};
use tokio::sync::mpsc;

pub struct NodeCollaborators {
    primary: Addr,
    seq: SeqNum,
    out_tx: mpsc::UnboundedSender<(Addr, Addr, CtlOp, Vec<u8>)>,
}

#[async_trait]
impl Collaborators for NodeCollaborators {
    async fn send_ctl(&self, tx: Addr, op: CtlOp, bytes: &[u8]) -> Result<(), RouteError> {
        let _ = self.out_tx.send((self.primary, tx, op, bytes.to_vec()));
        Ok(())
    }
    fn subnet_get(&self, _net_idx: NetIdx) -> Option<Vec<u8>> {
        None
    }
    fn primary_addr(&self) -> Addr {
        self.primary
    }
    fn elem_count(&self) -> u16 {
        1
    }
    fn elem_find(&self, addr: Addr) -> bool {
        addr == self.primary
    }
    fn session_seq(&self) -> SeqNum {
        self.seq
    }
}

pub struct Network {
    pub engines: HashMap<Addr, Arc<Engine<NodeCollaborators>>>,
    pump: tokio::task::JoinHandle<()>,
}

impl Network {
    /// `adjacency` lists, per node, the neighbours it can hear directly.
    /// Build it symmetric if the simulated links are bidirectional.
    pub fn new(adjacency: HashMap<Addr, Vec<Addr>>, config: RouteEngineConfig) -> Self {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let mut engines = HashMap::new();
        for &addr in adjacency.keys() {
            let collaborators = NodeCollaborators { primary: addr, seq: 1, out_tx: out_tx.clone() };
            engines.insert(addr, Arc::new(Engine::new(collaborators, config.clone())));
        }
        drop(out_tx);

        let pump_engines = engines.clone();
        let pump_adjacency = adjacency;
        let pump = tokio::spawn(async move {
            while let Some((from, to, op, bytes)) = out_rx.recv().await {
                let neighbours = match pump_adjacency.get(&from) {
                    Some(n) => n,
                    None => continue,
                };
                let targets: Vec<Addr> = if to == BROADCAST_ADDR {
                    neighbours.clone()
                } else if neighbours.contains(&to) {
                    vec![to]
                } else {
                    Vec::new()
                };
                for target in targets {
                    if let Some(engine) = pump_engines.get(&target) {
                        let rx = RxMeta { source_addr: from, dest_addr: target, net_idx: 0, rssi: -60, recv_ttl: 5 };
                        let _ = engine.on_ctl_receive(op, rx, &bytes).await;
                    }
                }
            }
        });

        Self { engines, pump }
    }

    pub fn node(&self, addr: Addr) -> Arc<Engine<NodeCollaborators>> {
        self.engines.get(&addr).expect("node present in network").clone()
    }

    pub fn stop_pump(&self) {
        self.pump.abort();
    }
}
