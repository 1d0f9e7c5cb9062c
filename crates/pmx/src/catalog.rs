//! 📚 The Catalog: every collection the pipeline knows how to move.
//!
//! A schema and a rule table per source collection, declared statically. Nothing here is
//! discovered at runtime. If a collection isn't in the catalog, the run stops before the
//! first byte of I/O with a configuration error, which beats discovering it at record
//! 40,000.

pub mod collections;
pub mod rules;
pub mod schema;

use std::collections::BTreeMap;

pub use rules::{FieldTransform, PartitionKeyFn, RuleTable};
pub use schema::{CollectionSchema, FieldFormat, FieldRule, FieldType};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    order: Vec<String>,
    schemas: BTreeMap<String, CollectionSchema>,
    rules: BTreeMap<String, RuleTable>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🏠 The property-management collections in their fixed run order.
    pub fn property_management() -> Self {
        Self::new()
            .with_collection(
                collections::AGENCIES,
                collections::agencies_schema(),
                collections::agencies_rules(),
            )
            .with_collection(
                collections::USERS,
                collections::users_schema(),
                collections::users_rules(),
            )
            .with_collection(
                collections::PROPERTIES,
                collections::properties_schema(),
                collections::properties_rules(),
            )
            .with_collection(
                collections::VIEWINGS,
                collections::viewings_schema(),
                collections::viewings_rules(),
            )
    }

    pub fn with_collection(self, name: &str, schema: CollectionSchema, rules: RuleTable) -> Self {
        self.with_schema(name, schema).with_rules(name, rules)
    }

    pub fn with_schema(mut self, name: &str, schema: CollectionSchema) -> Self {
        self.remember(name);
        self.schemas.insert(name.to_string(), schema);
        self
    }

    pub fn with_rules(mut self, name: &str, rules: RuleTable) -> Self {
        self.remember(name);
        self.rules.insert(name.to_string(), rules);
        self
    }

    fn remember(&mut self, name: &str) {
        if !self.order.iter().any(|known| known == name) {
            self.order.push(name.to_string());
        }
    }

    /// Collection names in declaration order.
    pub fn collection_names(&self) -> &[String] {
        &self.order
    }

    pub fn schema(&self, collection: &str) -> Result<&CollectionSchema, ConfigError> {
        self.schemas
            .get(collection)
            .ok_or_else(|| ConfigError::UnknownCollection(collection.to_string()))
    }

    pub fn rules(&self, collection: &str) -> Result<&RuleTable, ConfigError> {
        self.rules
            .get(collection)
            .ok_or_else(|| ConfigError::MissingRuleTable(collection.to_string()))
    }

    /// 🛂 Both halves must exist for every collection we're about to touch.
    pub fn preflight<S: AsRef<str>>(&self, collections: &[S]) -> Result<(), ConfigError> {
        for collection in collections {
            let collection = collection.as_ref();
            self.schema(collection)?;
            self.rules(collection)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_catalog_knows_its_running_order() {
        let catalog = Catalog::property_management();
        assert_eq!(
            catalog.collection_names(),
            &["agencies", "users", "properties", "viewings"]
        );
        assert!(catalog.preflight(catalog.collection_names()).is_ok());
    }

    #[test]
    fn the_one_where_a_schema_without_rules_is_a_config_error() {
        let catalog = Catalog::new().with_schema("leases", CollectionSchema::new());
        assert_eq!(
            catalog.preflight(&["leases"]),
            Err(ConfigError::MissingRuleTable("leases".into()))
        );
        assert_eq!(
            catalog.preflight(&["invoices"]),
            Err(ConfigError::UnknownCollection("invoices".into()))
        );
    }
}
