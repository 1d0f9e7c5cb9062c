//! 🏠 The property-management catalog: agencies, users, properties, viewings.
//!
//! Every collection the pipeline moves is declared here twice: once as a schema (what a
//! valid source record looks like) and once as a rule table (what it becomes). Add a
//! collection in one place but not the other and the orchestrator refuses to start.
//! That's the deal.

use super::rules::{FieldTransform, RuleTable, reference_id, string_field};
use super::schema::{CollectionSchema, FieldRule, FieldType};
use crate::common::SourceRecord;

pub const AGENCIES: &str = "agencies";
pub const USERS: &str = "users";
pub const PROPERTIES: &str = "properties";
pub const VIEWINGS: &str = "viewings";

const USER_ROLES: &[&str] = &["tenant", "landlord", "agent", "admin"];
const PROPERTY_STATUSES: &[&str] = &[
    "available",
    "under_offer",
    "let_agreed",
    "let",
    "sold",
    "withdrawn",
];
const LISTING_TYPES: &[&str] = &["rent", "sale"];
const CURRENCIES: &[&str] = &["GBP", "EUR", "USD"];
const VIEWING_STATUSES: &[&str] = &["requested", "confirmed", "completed", "cancelled", "no_show"];

fn address_schema() -> CollectionSchema {
    CollectionSchema::new()
        .require(&["line1", "city", "postcode"])
        .property("line1", FieldRule::string())
        .property("line2", FieldRule::string())
        .property("city", FieldRule::string())
        .property("postcode", FieldRule::string())
}

pub fn agencies_schema() -> CollectionSchema {
    CollectionSchema::new()
        .require(&["name", "contactEmail"])
        .property("name", FieldRule::string())
        .property("contactEmail", FieldRule::email())
        .property("phone", FieldRule::string())
        .property("address", FieldRule::nested(address_schema()))
        .property("active", FieldRule::boolean())
        .property("createdAt", FieldRule::timestamp())
}

// 🏢 an agency is its own tenant, so it partitions by its own id
fn agency_partition(record: &SourceRecord) -> Option<String> {
    Some(record.id.clone()).filter(|id| !id.is_empty())
}

pub fn agencies_rules() -> RuleTable {
    RuleTable::new(AGENCIES, agency_partition).field("createdAt", FieldTransform::Timestamp)
}

pub fn users_schema() -> CollectionSchema {
    CollectionSchema::new()
        .require(&["email", "role", "createdAt"])
        .property("email", FieldRule::email())
        .property("displayName", FieldRule::string())
        .property("role", FieldRule::one_of(USER_ROLES))
        .property("agency", FieldRule::object())
        .property("phone", FieldRule::string())
        .property("createdAt", FieldRule::timestamp())
        .property("lastLoginAt", FieldRule::timestamp())
        .property("savedProperties", FieldRule::array_of(FieldType::Object))
        .property(
            "profile",
            FieldRule::nested(
                CollectionSchema::new()
                    .property("avatarUrl", FieldRule::string())
                    .property("bio", FieldRule::string())
                    .property("phone", FieldRule::string()),
            ),
        )
        .property("marketingOptIn", FieldRule::boolean())
}

// 👤 users live with their agency; freelancers and tenants without one share "default"
fn user_partition(record: &SourceRecord) -> Option<String> {
    reference_id(record, "agency")
}

pub fn users_rules() -> RuleTable {
    RuleTable::new(USERS, user_partition)
        .field("createdAt", FieldTransform::Timestamp)
        .field("lastLoginAt", FieldTransform::Timestamp)
        .field("agency", FieldTransform::Reference)
        .field(
            "savedProperties",
            FieldTransform::array_of(FieldTransform::Reference),
        )
}

pub fn properties_schema() -> CollectionSchema {
    CollectionSchema::new()
        .require(&["title", "agency", "address", "price", "status", "listingType"])
        .property("title", FieldRule::string())
        .property("description", FieldRule::string())
        .property("agency", FieldRule::object())
        .property("landlord", FieldRule::object())
        .property("address", FieldRule::nested(address_schema()))
        .property("price", FieldRule::number())
        .property("currency", FieldRule::one_of(CURRENCIES))
        .property("bedrooms", FieldRule::number())
        .property("bathrooms", FieldRule::number())
        .property("status", FieldRule::one_of(PROPERTY_STATUSES))
        .property("listingType", FieldRule::one_of(LISTING_TYPES))
        .property("location", FieldRule::object())
        .property("images", FieldRule::array_of(FieldType::String))
        .property("features", FieldRule::array_of(FieldType::String))
        .property("createdAt", FieldRule::timestamp())
        .property("updatedAt", FieldRule::timestamp())
}

fn property_partition(record: &SourceRecord) -> Option<String> {
    reference_id(record, "agency").or_else(|| string_field(record, "agencyId"))
}

pub fn properties_rules() -> RuleTable {
    RuleTable::new(PROPERTIES, property_partition)
        .field("agency", FieldTransform::Reference)
        .field("landlord", FieldTransform::Reference)
        .field("location", FieldTransform::GeoPoint)
        .field("createdAt", FieldTransform::Timestamp)
        .field("updatedAt", FieldTransform::Timestamp)
        .field("images", FieldTransform::Array(None))
}

pub fn viewings_schema() -> CollectionSchema {
    CollectionSchema::new()
        .require(&["property", "requestedBy", "scheduledAt", "status"])
        .property("property", FieldRule::object())
        .property("requestedBy", FieldRule::object())
        .property("agent", FieldRule::object())
        .property("scheduledAt", FieldRule::timestamp())
        .property("status", FieldRule::one_of(VIEWING_STATUSES))
        .property("notes", FieldRule::string())
        .property("attendees", FieldRule::array_of(FieldType::Object))
        .property("createdAt", FieldRule::timestamp())
}

// 📅 viewings sit next to the property they're for, so a listing's diary is one partition
fn viewing_partition(record: &SourceRecord) -> Option<String> {
    reference_id(record, "property")
}

pub fn viewings_rules() -> RuleTable {
    RuleTable::new(VIEWINGS, viewing_partition)
        .field("property", FieldTransform::Reference)
        .field("requestedBy", FieldTransform::Reference)
        .field("agent", FieldTransform::Reference)
        .field("scheduledAt", FieldTransform::Timestamp)
        .field("createdAt", FieldTransform::Timestamp)
        .field(
            "attendees",
            FieldTransform::array_of(FieldTransform::Reference),
        )
}
