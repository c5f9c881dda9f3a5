//! The shared network template.
//!
//! The base network description is loaded and validated exactly once. The
//! validated model is then kept as an engine-serialized byte buffer, and every
//! scenario materializes its own fresh engine-native copy from that buffer, so
//! concurrent workers can never alias mutable simulation state and the source
//! file is not re-parsed once per scenario.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::engine::{Engine, EngineError, NodeClass};
use crate::ident::{IdPolicy, NodeId};

#[derive(Debug)]
pub struct ModelRepository {
    source: PathBuf,
    id_policy: IdPolicy,
    /// Serialized validated template. `None` only if serialization failed at
    /// load time, in which case clones re-read the source path.
    buffer: Option<Vec<u8>>,
    classes: FxHashMap<NodeId, NodeClass>,
    raw_ids: FxHashMap<NodeId, String>,
    junctions: Vec<NodeId>,
}

impl ModelRepository {
    /// Loads and validates the base network description.
    ///
    /// Fails with [`InvalidModelError`] if the file cannot be read, the
    /// engine cannot parse it, or it contains no junction nodes — all of
    /// which make the whole batch unrunnable.
    pub fn load<E: Engine>(
        engine: &E,
        path: impl Into<PathBuf>,
        id_policy: IdPolicy,
    ) -> Result<Self, InvalidModelError> {
        let source = path.into();
        let bytes = read_description(&source)?;
        let template = engine.load(&bytes).map_err(InvalidModelError::Parse)?;

        let mut classes = FxHashMap::default();
        let mut raw_ids = FxHashMap::default();
        let mut junctions = Vec::new();
        for (raw, class) in engine.nodes(&template) {
            let id = NodeId::new(&raw, id_policy);
            if class == NodeClass::Junction {
                junctions.push(id.clone());
            }
            raw_ids.insert(id.clone(), raw);
            classes.insert(id, class);
        }
        // Deterministic node ordering regardless of engine iteration order.
        junctions.sort();
        if junctions.is_empty() {
            return Err(InvalidModelError::NoJunctions);
        }

        let buffer = match engine.serialize(&template) {
            Ok(buf) => Some(buf),
            Err(error) => {
                tracing::warn!(
                    %error,
                    path = %source.display(),
                    "failed to serialize validated template; clones will \
                     re-read the source file, which can race with concurrent \
                     filesystem access"
                );
                None
            }
        };

        tracing::info!(
            path = %source.display(),
            nodes = classes.len(),
            junctions = junctions.len(),
            buffered = buffer.is_some(),
            "loaded network template"
        );
        Ok(Self {
            source,
            id_policy,
            buffer,
            classes,
            raw_ids,
            junctions,
        })
    }

    /// Materializes an independent engine-native copy of the template.
    pub fn clone_template<E: Engine>(&self, engine: &E) -> Result<E::Net, InvalidModelError> {
        match &self.buffer {
            Some(buffer) => engine.load(buffer).map_err(InvalidModelError::Parse),
            None => {
                tracing::warn!(
                    path = %self.source.display(),
                    "no serialized template buffer; re-reading the source \
                     file (racy under concurrent filesystem access)"
                );
                let bytes = read_description(&self.source)?;
                engine.load(&bytes).map_err(InvalidModelError::Parse)
            }
        }
    }

    /// Junction nodes eligible to host leaks, in canonical order.
    pub fn junctions(&self) -> &[NodeId] {
        &self.junctions
    }

    pub fn node_class(&self, id: &NodeId) -> Option<NodeClass> {
        self.classes.get(id).copied()
    }

    /// The engine-native spelling of a canonical id.
    pub fn raw_id(&self, id: &NodeId) -> Option<&str> {
        self.raw_ids.get(id).map(String::as_str)
    }

    pub fn id_policy(&self) -> IdPolicy {
        self.id_policy
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

fn read_description(path: &Path) -> Result<Vec<u8>, InvalidModelError> {
    std::fs::read(path).map_err(|source| InvalidModelError::Read {
        path: path.to_owned(),
        source,
    })
}

/// The template is unusable. Always batch-fatal.
#[derive(Debug, thiserror::Error)]
pub enum InvalidModelError {
    #[error("failed to read model description at {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine rejected the model description")]
    Parse(#[source] EngineError),

    #[error("model has no junction nodes to host leaks")]
    NoJunctions,
}
