//! Builds the concrete `StreamSource`/`StreamSink` set an `Engine` needs
//! from the loaded relation trees and config, topic names resolved through
//! `topics.default`/`topics.<name>` the way `table_name_for` recovers them
//! in reverse (spec §6 config table, §9 open question on `topics.prefixed`).

use indexmap::IndexSet;

use southpaw_core::{MemoryStreamHub, RootHandle, TRANSACTIONS_ENTITY};
#[cfg(feature = "kafka")]
use southpaw_core::{KafkaStreamSink, KafkaStreamSource};
use southpaw_core::{StreamSink, StreamSource};
use southpaw_types::{Config, Relation};

/// Every distinct entity name touched by `roots`, plus the synthetic
/// `transactions` stream, in the order first encountered.
pub fn entities_for(roots: &[Relation]) -> Vec<String> {
    let mut seen = IndexSet::new();
    for root in roots {
        seen.insert(root.entity.clone());
        for (_, child) in root.edges() {
            seen.insert(child.entity.clone());
        }
    }
    seen.insert(TRANSACTIONS_ENTITY.to_string());
    seen.into_iter().collect()
}

/// The external topic name an entity is read from: `topics.default.prefix`
/// (or a `topics.<topic>` override keyed by the resulting name) prepended,
/// mirroring what `Config::topics::table_name_for` strips back off on the
/// `transactions` stream's `data_collections` aliases.
pub fn topic_for_entity(config: &Config, entity: &str) -> String {
    let prefix = config.topics.default.as_ref().and_then(|d| d.prefix.clone());
    match prefix {
        Some(prefix) => format!("{prefix}.{entity}"),
        None => entity.to_string(),
    }
}

/// Builds root handles backed by an in-memory sink, for `--build`'s dry
/// validation pass — opens indices and exercises the relation tree without
/// requiring a live output topic.
pub fn dry_run_roots(hub: &mut MemoryStreamHub, roots: Vec<Relation>) -> Vec<RootHandle> {
    roots
        .into_iter()
        .map(|root| {
            let name = root
                .denormalized_name
                .clone()
                .expect("validated: root has denormalized_name");
            let sink = hub.sink(&name);
            RootHandle::new(root, Box::new(sink))
        })
        .collect()
}

pub fn dry_run_sources(hub: &mut MemoryStreamHub, roots: &[Relation]) -> Vec<(String, Box<dyn StreamSource>)> {
    entities_for(roots)
        .into_iter()
        .map(|entity| {
            let source = hub.source(&entity);
            (entity, Box::new(source) as Box<dyn StreamSource>)
        })
        .collect()
}

#[cfg(feature = "kafka")]
pub fn kafka_roots(
    bootstrap_servers: &str,
    roots: Vec<Relation>,
) -> Result<Vec<RootHandle>, crate::errors::CliError> {
    let mut out = Vec::with_capacity(roots.len());
    for root in roots {
        let name = root
            .denormalized_name
            .clone()
            .expect("validated: root has denormalized_name");
        let sink = KafkaStreamSink::new(bootstrap_servers, &name)?;
        out.push(RootHandle::new(root, Box::new(sink) as Box<dyn StreamSink>));
    }
    Ok(out)
}

#[cfg(feature = "kafka")]
pub fn kafka_sources(
    bootstrap_servers: &str,
    group_id: &str,
    config: &Config,
    roots: &[Relation],
) -> Result<Vec<(String, Box<dyn StreamSource>)>, crate::errors::CliError> {
    let mut out = Vec::new();
    for entity in entities_for(roots) {
        let topic = topic_for_entity(config, &entity);
        let source = KafkaStreamSource::new(bootstrap_servers, group_id, &entity, &topic)?;
        out.push((entity, Box::new(source) as Box<dyn StreamSource>));
    }
    Ok(out)
}
