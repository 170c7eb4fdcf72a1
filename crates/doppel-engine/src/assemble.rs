//! Parsing swept records into assemblies.

use std::sync::Arc;

use doppel_core::{parse_node, Assembly, AssemblyBuilder, CodecError, Element};
use doppel_storage::AssemblyRecord;

use crate::error::EngineError;

/// Builds an [`Assembly`] from one swept `(root, tuples)` record.
///
/// The record's root becomes the assembly's single root. A `(None, None)`
/// sentinel tuple marks an isolated root and is skipped; the root itself is
/// already part of the assembly.
fn parse_assembly(record: &AssemblyRecord) -> Result<Assembly, CodecError> {
    let root: Arc<dyn Element> = Arc::from(parse_node(&record.root)?);

    let mut builder = AssemblyBuilder::default();
    builder.roots([root]);

    for tuple in &record.tuples {
        match (&tuple.from, &tuple.to) {
            (None, None) => continue,
            (Some(from), Some(to)) => {
                let source: Arc<dyn Element> = Arc::from(parse_node(from)?);
                let target: Arc<dyn Element> = Arc::from(parse_node(to)?);
                builder.connect(source, target);
            }
            (None, Some(_)) => return Err(CodecError::PropertyMissing("from".into())),
            (Some(_), None) => return Err(CodecError::PropertyMissing("to".into())),
        }
    }

    Ok(builder.build())
}

/// Like [`parse_assembly`], but escalates decode failures that indicate a
/// sweep/code skew to a panic.
///
/// Those failures happen when the backend's sweep shape changed but code
/// depending on its specifics was missed. Routing every call site through
/// this wrapper keeps the escalation uniform. A content-address mismatch
/// stays an error: it may stem from a hand-modified storage row.
pub(crate) fn safely_parse_assembly(record: &AssemblyRecord) -> Result<Assembly, EngineError> {
    match parse_assembly(record) {
        Ok(assembly) => Ok(assembly),
        Err(err @ (CodecError::PropertyMissing(_) | CodecError::UnexpectedPropertyType { .. })) => {
            tracing::error!(error = %err, "the backend sweep shape was modified without care");
            panic!("seek developer attention: backend sweep result: {err}");
        }
        Err(err) => Err(EngineError::Codec(err)),
    }
}
