//! Test fixtures shared across module tests.

use crate::engine::{
    Engine, EngineError, EngineOutput, LeakParams, LinkSample, NodeClass, NodeSample, SimClock,
};

/// A tiny network description in the stub engine's line format.
pub(crate) fn small_description() -> &'static str {
    "junction 1\n\
     junction 2\n\
     junction 7\n\
     reservoir R1\n\
     pipe P1\n\
     pipe P2\n"
}

/// A deterministic in-process stand-in for a hydraulic solver. Parses a
/// line-oriented description (`junction <id>`, `reservoir <id>`,
/// `tank <id>`, `pipe <id>`) and fabricates fixed time series.
#[derive(Debug, Default)]
pub(crate) struct StubEngine {
    /// Fail `run` whenever a leak targets this raw node id.
    pub(crate) diverge_on: Option<String>,
    /// Report `leak_demand` samples at active leak nodes.
    pub(crate) report_leak_demand: bool,
    /// Make `serialize` fail, forcing clones to re-read the source file.
    pub(crate) fail_serialize: bool,
}

#[derive(Debug)]
pub(crate) struct StubNet {
    nodes: Vec<(String, NodeClass)>,
    links: Vec<String>,
    leaks: Vec<LeakParams>,
}

impl StubNet {
    pub(crate) fn leak_count(&self) -> usize {
        self.leaks.len()
    }
}

impl Engine for StubEngine {
    type Net = StubNet;

    fn load(&self, description: &[u8]) -> Result<Self::Net, EngineError> {
        let text = std::str::from_utf8(description)
            .map_err(|e| EngineError::Parse(e.to_string()))?;
        let mut nodes = Vec::new();
        let mut links = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("junction"), Some(id)) => nodes.push((id.to_owned(), NodeClass::Junction)),
                (Some("reservoir"), Some(id)) => nodes.push((id.to_owned(), NodeClass::Reservoir)),
                (Some("tank"), Some(id)) => nodes.push((id.to_owned(), NodeClass::Tank)),
                (Some("pipe"), Some(id)) => links.push(id.to_owned()),
                _ => return Err(EngineError::Parse(format!("bad line: {line}"))),
            }
        }
        Ok(StubNet {
            nodes,
            links,
            leaks: Vec::new(),
        })
    }

    fn serialize(&self, net: &Self::Net) -> Result<Vec<u8>, EngineError> {
        if self.fail_serialize {
            return Err(EngineError::Parse("serialization disabled".to_owned()));
        }
        let mut out = String::new();
        for (id, class) in &net.nodes {
            let keyword = match class {
                NodeClass::Junction => "junction",
                NodeClass::Reservoir => "reservoir",
                NodeClass::Tank => "tank",
            };
            out.push_str(keyword);
            out.push(' ');
            out.push_str(id);
            out.push('\n');
        }
        for id in &net.links {
            out.push_str("pipe ");
            out.push_str(id);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    fn nodes(&self, net: &Self::Net) -> Vec<(String, NodeClass)> {
        net.nodes.clone()
    }

    fn apply_leak(&self, net: &mut Self::Net, leak: &LeakParams) -> Result<(), EngineError> {
        if !net.nodes.iter().any(|(id, _)| id == &leak.node) {
            return Err(EngineError::UnknownNode(leak.node.clone()));
        }
        net.leaks.push(leak.clone());
        Ok(())
    }

    fn run(&self, net: &Self::Net, clock: SimClock) -> Result<EngineOutput, EngineError> {
        if let Some(bad) = &self.diverge_on {
            if net.leaks.iter().any(|leak| &leak.node == bad) {
                return Err(EngineError::Diverged(format!(
                    "solver diverged at node {bad}"
                )));
            }
        }

        let times: Vec<u64> = (0..=clock.duration_s)
            .step_by(clock.report_timestep_s as usize)
            .collect();
        let mut output = EngineOutput::default();
        for (i, (id, _)) in net.nodes.iter().enumerate() {
            let samples = times
                .iter()
                .map(|&t| {
                    let leaking = net
                        .leaks
                        .iter()
                        .any(|leak| &leak.node == id && (leak.start_s..=leak.end_s).contains(&t));
                    NodeSample {
                        time_s: t,
                        pressure_m: 30.0 + i as f64,
                        head_m: 130.0 + i as f64,
                        demand_m3s: 0.001 * (i + 1) as f64,
                        leak_demand_m3s: (self.report_leak_demand && leaking).then_some(0.002),
                    }
                })
                .collect();
            output.nodes.insert(id.clone(), samples);
        }
        for (i, id) in net.links.iter().enumerate() {
            let samples = times
                .iter()
                .map(|&t| LinkSample {
                    time_s: t,
                    flow_m3s: 0.01 * (i + 1) as f64,
                })
                .collect();
            output.links.insert(id.clone(), samples);
        }
        Ok(output)
    }
}
