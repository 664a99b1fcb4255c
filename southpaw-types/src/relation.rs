use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// A node in the user-supplied denormalization tree (spec §3, "Relation").
///
/// Matches the JSON schema from spec §6 field-for-field: `DenormalizedName`
/// is required on (and only on) the root, `JoinKey`/`ParentKey` are required
/// on (and only on) non-root nodes. `deny_unknown_fields` reflects
/// "additional properties rejected".
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Relation {
    #[serde(rename = "DenormalizedName", skip_serializing_if = "Option::is_none")]
    pub denormalized_name: Option<String>,
    #[serde(rename = "Entity")]
    pub entity: String,
    #[serde(rename = "JoinKey", skip_serializing_if = "Option::is_none")]
    pub join_key: Option<String>,
    #[serde(rename = "ParentKey", skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
    #[serde(rename = "Children", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Relation>,
}

impl Relation {
    pub fn is_root(&self) -> bool {
        self.denormalized_name.is_some()
    }

    /// Validates the invariants from spec §3: exactly one root per tree,
    /// `join_key`/`parent_key` present iff the node is a child,
    /// `denormalized_name` present iff root, no cycles (guaranteed here by
    /// construction since `children` is a tree, not a graph, but depth is
    /// still bounded to catch pathological configs).
    pub fn validate_as_root(&self) -> Result<(), ConfigError> {
        if self.denormalized_name.is_none() {
            return Err(ConfigError::MissingDenormalizedName(self.entity.clone()));
        }
        if self.join_key.is_some() || self.parent_key.is_some() {
            return Err(ConfigError::RootHasJoinKeys(self.entity.clone()));
        }
        self.validate_children(0)
    }

    fn validate_children(&self, depth: usize) -> Result<(), ConfigError> {
        const MAX_DEPTH: usize = 64;
        if depth > MAX_DEPTH {
            return Err(ConfigError::RelationTreeTooDeep(MAX_DEPTH));
        }
        for child in &self.children {
            if child.denormalized_name.is_some() {
                return Err(ConfigError::NonRootHasDenormalizedName(child.entity.clone()));
            }
            if child.join_key.is_none() || child.parent_key.is_none() {
                return Err(ConfigError::ChildMissingJoinKeys(child.entity.clone()));
            }
            child.validate_children(depth + 1)?;
        }
        Ok(())
    }

    /// All `(parent, child)` edges in the tree, depth-first.
    pub fn edges(&self) -> Vec<(&Relation, &Relation)> {
        let mut out = Vec::new();
        self.collect_edges(&mut out);
        out
    }

    fn collect_edges<'a>(&'a self, out: &mut Vec<(&'a Relation, &'a Relation)>) {
        for child in &self.children {
            out.push((self, child));
            child.collect_edges(out);
        }
    }

    /// Depth-first search for `entity` within this tree (spec §4.2).
    /// Returns `(parent, matched)`; `parent == None` iff `entity` is the
    /// root itself. The first DFS match wins when an entity name repeats
    /// within one tree, so duplicate subtrees deliberately share join
    /// state.
    pub fn find<'a>(&'a self, entity: &str) -> Option<(Option<&'a Relation>, &'a Relation)> {
        if self.entity == entity {
            return Some((None, self));
        }
        self.find_in_children(entity)
    }

    fn find_in_children<'a>(&'a self, entity: &str) -> Option<(Option<&'a Relation>, &'a Relation)> {
        for child in &self.children {
            if child.entity == entity {
                return Some((Some(self), child));
            }
            if let Some(found) = child.find_in_children(entity) {
                return Some(found);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_with_caption() -> Relation {
        Relation {
            denormalized_name: Some("feed".to_string()),
            entity: "media".to_string(),
            join_key: None,
            parent_key: None,
            children: vec![Relation {
                denormalized_name: None,
                entity: "caption".to_string(),
                join_key: Some("media_id".to_string()),
                parent_key: Some("id".to_string()),
                children: vec![],
            }],
        }
    }

    #[test]
    fn validates_well_formed_tree() {
        assert!(media_with_caption().validate_as_root().is_ok());
    }

    #[test]
    fn rejects_root_without_denormalized_name() {
        let mut root = media_with_caption();
        root.denormalized_name = None;
        assert!(matches!(
            root.validate_as_root(),
            Err(ConfigError::MissingDenormalizedName(_))
        ));
    }

    #[test]
    fn rejects_child_missing_join_keys() {
        let mut root = media_with_caption();
        root.children[0].join_key = None;
        assert!(matches!(
            root.validate_as_root(),
            Err(ConfigError::ChildMissingJoinKeys(_))
        ));
    }

    #[test]
    fn find_locates_root_and_child() {
        let root = media_with_caption();
        let (parent, matched) = root.find("media").unwrap();
        assert!(parent.is_none());
        assert_eq!(matched.entity, "media");

        let (parent, matched) = root.find("caption").unwrap();
        assert_eq!(parent.unwrap().entity, "media");
        assert_eq!(matched.entity, "caption");

        assert!(root.find("unrelated").is_none());
    }

    #[test]
    fn edges_enumerates_depth_first() {
        let root = media_with_caption();
        let edges = root.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].0.entity, "media");
        assert_eq!(edges[0].1.entity, "caption");
    }

    #[test]
    fn deserializes_relation_file_shape() {
        let json = r#"
        {
            "DenormalizedName": "feed",
            "Entity": "media",
            "Children": [
                { "Entity": "caption", "JoinKey": "media_id", "ParentKey": "id" }
            ]
        }"#;
        let relation: Relation = serde_json::from_str(json).unwrap();
        assert!(relation.validate_as_root().is_ok());
    }

    #[test]
    fn rejects_additional_properties() {
        let json = r#"{ "DenormalizedName": "feed", "Entity": "media", "Bogus": true }"#;
        assert!(serde_json::from_str::<Relation>(json).is_err());
    }
}
