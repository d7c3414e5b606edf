//! DynamoDB-backed document store.
//!
//! Single-table layout:
//! - document:  PK=`<collection>`                 SK=`<id>`            doc=M{...}
//! - marker:    PK=`unique#<collection>#<field>`  SK=`<json value>`    owner=S(<id>)
//!
//! A marker reserves one unique field value and is written in the same
//! transaction as the document it belongs to.

use super::{changes, unique_key, unique_keys, with_id, DocumentStore};
use crate::config::Config;
use crate::error::StoreError;
use crate::filter::{Clause, Filter};
use crate::schema::{MAX_MAGNITUDE, MIN_MAGNITUDE};
use crate::types::{Collection, Document, DocumentId, UpdateResult};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, ReturnValue, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client as DynamoClient;
use serde_json::{Number, Value};
use std::collections::HashMap;

type Item = HashMap<String, AttributeValue>;

const DOC_ATTR: &str = "doc";
const OWNER_ATTR: &str = "owner";
const NOT_EXISTS: &str = "attribute_not_exists(PK)";
const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";

pub struct DynamoStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Build the client from the standard AWS environment, honouring an endpoint override
    pub async fn from_config(config: &Config) -> Self {
        let sdk_config = aws_config::load_from_env().await;

        let client = match &config.dynamodb_endpoint {
            Some(endpoint) => {
                tracing::info!("Using DynamoDB endpoint {}", endpoint);
                let dynamo_config = aws_sdk_dynamodb::config::Builder::from(&sdk_config)
                    .endpoint_url(endpoint)
                    .build();
                DynamoClient::from_conf(dynamo_config)
            }
            None => DynamoClient::new(&sdk_config),
        };

        Self::new(client, config.table_name.clone())
    }

    fn put(&self, item: Item, condition: &str) -> Result<TransactWriteItem, StoreError> {
        let put = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression(condition)
            .build()?;
        Ok(TransactWriteItem::builder().put(put).build())
    }

    /// Remove a marker unless another document owns it
    fn release_marker(
        &self,
        collection: Collection,
        field: &str,
        value_key: &str,
        owner: DocumentId,
    ) -> Result<TransactWriteItem, StoreError> {
        let delete = Delete::builder()
            .table_name(&self.table_name)
            .set_key(Some(marker_key(collection, field, value_key)))
            .condition_expression("attribute_not_exists(PK) OR #owner = :owner")
            .expression_attribute_names("#owner", OWNER_ATTR)
            .expression_attribute_values(":owner", AttributeValue::S(owner.to_string()))
            .build()?;
        Ok(TransactWriteItem::builder().delete(delete).build())
    }

    fn claim_marker(
        &self,
        collection: Collection,
        field: &str,
        value_key: &str,
        owner: DocumentId,
    ) -> Result<TransactWriteItem, StoreError> {
        let mut item = marker_key(collection, field, value_key);
        item.insert(OWNER_ATTR.to_string(), AttributeValue::S(owner.to_string()));
        self.put(item, NOT_EXISTS)
    }

    async fn get_document(
        &self,
        collection: Collection,
        id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(document_key(collection, id)))
            .consistent_read(true)
            .send()
            .await
            .map_err(StoreError::dynamo)?;

        match result.item() {
            Some(item) => Ok(Some(decode_item(collection, item)?.1)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentStore for DynamoStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let table = self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
            .map_err(StoreError::dynamo)?;

        tracing::info!(
            "Connected to DynamoDB table {} (status: {:?})",
            self.table_name,
            table.table().and_then(|t| t.table_status())
        );
        Ok(())
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        let pushdown = Pushdown::from_filter(filter);
        let mut docs = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let mut request = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk")
                .expression_attribute_values(":pk", AttributeValue::S(collection.name().to_string()))
                .set_exclusive_start_key(start_key.take());

            if let Some(expression) = pushdown.expression() {
                request = request.filter_expression(expression);
                for (k, v) in &pushdown.names {
                    request = request.expression_attribute_names(k, v);
                }
                for (k, v) in &pushdown.values {
                    request = request.expression_attribute_values(k, v.clone());
                }
            }

            let output = request.send().await.map_err(StoreError::dynamo)?;

            for item in output.items() {
                let (id, doc) = decode_item(collection, item)?;
                // Clauses DynamoDB cannot express are applied here
                if filter.matches(&doc) {
                    docs.push(with_id(id, doc));
                }
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(docs)
    }

    async fn find_one(
        &self,
        collection: Collection,
        id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self
            .get_document(collection, id)
            .await?
            .map(|doc| with_id(id, doc)))
    }

    async fn insert_one(
        &self,
        collection: Collection,
        doc: Document,
    ) -> Result<DocumentId, StoreError> {
        let id = DocumentId::generate();
        let mut item = document_key(collection, id);
        item.insert(DOC_ATTR.to_string(), AttributeValue::M(document_to_map(&doc)));

        let keys = unique_keys(collection, &doc);
        if keys.is_empty() {
            self.client
                .put_item()
                .table_name(&self.table_name)
                .set_item(Some(item))
                .condition_expression(NOT_EXISTS)
                .send()
                .await
                .map_err(StoreError::dynamo)?;
            return Ok(id);
        }

        let mut writes = vec![self.put(item, NOT_EXISTS)?];
        let mut claims = vec![None];
        for (field, value_key) in &keys {
            writes.push(self.claim_marker(collection, field, value_key, id)?);
            claims.push(Some(*field));
        }

        match self
            .client
            .transact_write_items()
            .set_transact_items(Some(writes))
            .send()
            .await
        {
            Ok(_) => Ok(id),
            Err(err) => match failed_claim(&err, &claims) {
                Some(field) => Err(StoreError::UniqueViolation {
                    collection: collection.name(),
                    field,
                }),
                None => Err(StoreError::dynamo(err)),
            },
        }
    }

    async fn update_one(
        &self,
        collection: Collection,
        id: DocumentId,
        set: Document,
    ) -> Result<UpdateResult, StoreError> {
        let Some(current) = self.get_document(collection, id).await? else {
            return Ok(UpdateResult::new(false, false));
        };
        if set.is_empty() {
            return Ok(UpdateResult::new(true, false));
        }
        let modified = changes(&current, &set);

        let mut names = HashMap::from([("#doc".to_string(), DOC_ATTR.to_string())]);
        let mut values = HashMap::new();
        let assignments: Vec<String> = set
            .iter()
            .enumerate()
            .map(|(i, (field, value))| {
                names.insert(format!("#f{}", i), field.clone());
                values.insert(format!(":f{}", i), to_attribute(value));
                format!("#doc.#f{} = :f{}", i, i)
            })
            .collect();
        let update_expression = format!("SET {}", assignments.join(", "));

        // (field, old key, new key) for unique fields whose value changes
        let moves: Vec<(&'static str, Option<String>, Option<String>)> = collection
            .unique_fields()
            .iter()
            .filter(|field| set.contains_key(**field))
            .map(|field| (*field, unique_key(current.get(*field)), unique_key(set.get(*field))))
            .filter(|(_, old, new)| old != new)
            .collect();

        if moves.is_empty() {
            let result = self
                .client
                .update_item()
                .table_name(&self.table_name)
                .set_key(Some(document_key(collection, id)))
                .update_expression(update_expression)
                .condition_expression("attribute_exists(PK)")
                .set_expression_attribute_names(Some(names))
                .set_expression_attribute_values(Some(values))
                .send()
                .await;

            return match result {
                Ok(_) => Ok(UpdateResult::new(true, modified)),
                Err(err)
                    if err
                        .as_service_error()
                        .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
                {
                    // Deleted since it was read
                    Ok(UpdateResult::new(false, false))
                }
                Err(err) => Err(StoreError::dynamo(err)),
            };
        }

        let mut conditions = vec!["attribute_exists(PK)".to_string()];
        conditions.extend(unique_fields_unchanged(collection, &current, &mut names, &mut values));

        let update = Update::builder()
            .table_name(&self.table_name)
            .set_key(Some(document_key(collection, id)))
            .update_expression(update_expression)
            .condition_expression(conditions.join(" AND "))
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .build()?;

        let mut writes = vec![TransactWriteItem::builder().update(update).build()];
        let mut claims = vec![None];
        for (field, old_key, new_key) in &moves {
            if let Some(key) = old_key {
                writes.push(self.release_marker(collection, field, key, id)?);
                claims.push(None);
            }
            if let Some(key) = new_key {
                writes.push(self.claim_marker(collection, field, key, id)?);
                claims.push(Some(*field));
            }
        }

        match self
            .client
            .transact_write_items()
            .set_transact_items(Some(writes))
            .send()
            .await
        {
            Ok(_) => Ok(UpdateResult::new(true, modified)),
            Err(err) => match failed_claim(&err, &claims) {
                Some(field) => Err(StoreError::UniqueViolation {
                    collection: collection.name(),
                    field,
                }),
                None => Err(StoreError::dynamo(err)),
            },
        }
    }

    async fn delete_one(&self, collection: Collection, id: DocumentId) -> Result<bool, StoreError> {
        if collection.unique_fields().is_empty() {
            let output = self
                .client
                .delete_item()
                .table_name(&self.table_name)
                .set_key(Some(document_key(collection, id)))
                .return_values(ReturnValue::AllOld)
                .send()
                .await
                .map_err(StoreError::dynamo)?;
            return Ok(output.attributes().is_some_and(|old| !old.is_empty()));
        }

        let Some(current) = self.get_document(collection, id).await? else {
            return Ok(false);
        };

        let mut names = HashMap::from([("#doc".to_string(), DOC_ATTR.to_string())]);
        let mut values = HashMap::new();
        let mut conditions = vec!["attribute_exists(PK)".to_string()];
        conditions.extend(unique_fields_unchanged(collection, &current, &mut names, &mut values));

        let delete = Delete::builder()
            .table_name(&self.table_name)
            .set_key(Some(document_key(collection, id)))
            .condition_expression(conditions.join(" AND "))
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values((!values.is_empty()).then_some(values))
            .build()?;

        let mut writes = vec![TransactWriteItem::builder().delete(delete).build()];
        for (field, value_key) in unique_keys(collection, &current) {
            writes.push(self.release_marker(collection, field, &value_key, id)?);
        }

        match self
            .client
            .transact_write_items()
            .set_transact_items(Some(writes))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if failed_indexes(&err).contains(&0) => {
                tracing::warn!(
                    "{} {} changed or vanished while being deleted",
                    collection.entity(),
                    id
                );
                Ok(false)
            }
            Err(err) => Err(StoreError::dynamo(err)),
        }
    }
}

fn document_key(collection: Collection, id: DocumentId) -> Item {
    HashMap::from([
        ("PK".to_string(), AttributeValue::S(collection.name().to_string())),
        ("SK".to_string(), AttributeValue::S(id.to_string())),
    ])
}

fn marker_key(collection: Collection, field: &str, value_key: &str) -> Item {
    HashMap::from([
        (
            "PK".to_string(),
            AttributeValue::S(format!("unique#{}#{}", collection.name(), field)),
        ),
        ("SK".to_string(), AttributeValue::S(value_key.to_string())),
    ])
}

/// Conditions asserting the stored unique fields still hold the values in `current`
fn unique_fields_unchanged(
    collection: Collection,
    current: &Document,
    names: &mut HashMap<String, String>,
    values: &mut HashMap<String, AttributeValue>,
) -> Vec<String> {
    collection
        .unique_fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let name = format!("#u{}", i);
            let placeholder = format!(":u{}", i);
            names.insert(name.clone(), field.to_string());
            match current.get(*field) {
                None => format!("attribute_not_exists(#doc.{})", name),
                Some(Value::Null) => {
                    values.insert(placeholder.clone(), AttributeValue::S("NULL".to_string()));
                    format!("attribute_type(#doc.{}, {})", name, placeholder)
                }
                Some(value) => {
                    values.insert(placeholder.clone(), to_attribute(value));
                    format!("#doc.{} = {}", name, placeholder)
                }
            }
        })
        .collect()
}

/// Positions of transaction writes whose condition failed
fn failed_indexes<R>(err: &SdkError<TransactWriteItemsError, R>) -> Vec<usize> {
    match err.as_service_error() {
        Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) => cancelled
            .cancellation_reasons()
            .iter()
            .enumerate()
            .filter(|(_, reason)| reason.code() == Some(CONDITIONAL_CHECK_FAILED))
            .map(|(i, _)| i)
            .collect(),
        _ => Vec::new(),
    }
}

/// The unique field whose marker could not be claimed, if that is why the transaction failed
fn failed_claim<R>(
    err: &SdkError<TransactWriteItemsError, R>,
    claims: &[Option<&'static str>],
) -> Option<&'static str> {
    failed_indexes(err)
        .into_iter()
        .find_map(|i| claims.get(i).copied().flatten())
}

fn decode_item(collection: Collection, item: &Item) -> Result<(DocumentId, Document), StoreError> {
    let corrupt = |reason: &str| StoreError::Corrupt {
        collection: collection.name(),
        reason: reason.to_string(),
    };

    let id = item
        .get("SK")
        .and_then(|v| v.as_s().ok())
        .and_then(|sk| DocumentId::parse(sk))
        .ok_or_else(|| corrupt("missing or malformed SK"))?;

    match item.get(DOC_ATTR) {
        Some(AttributeValue::M(map)) => Ok((id, map_to_document(map))),
        _ => Err(corrupt("missing doc attribute")),
    }
}

/// Filter clauses DynamoDB can evaluate server-side
#[derive(Debug, Default)]
struct Pushdown {
    conditions: Vec<String>,
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl Pushdown {
    fn from_filter(filter: &Filter) -> Self {
        let mut pushdown = Self::default();

        for (i, clause) in filter.clauses().iter().enumerate() {
            match clause {
                Clause::Equals { field, value } => {
                    let path = pushdown.path(i, field);
                    pushdown.values.insert(format!(":v{}", i), AttributeValue::S(value.clone()));
                    pushdown.conditions.push(format!("{} = :v{}", path, i));
                }
                Clause::Range { field, min, max } => {
                    let lo = min.and_then(|min| storable_bound(min, false));
                    let hi = max.and_then(|max| storable_bound(max, true));
                    if lo.is_none() && hi.is_none() {
                        continue;
                    }
                    let path = pushdown.path(i, field);
                    if let Some(lo) = lo {
                        pushdown.values.insert(format!(":lo{}", i), AttributeValue::N(lo));
                        pushdown.conditions.push(format!("{} >= :lo{}", path, i));
                    }
                    if let Some(hi) = hi {
                        pushdown.values.insert(format!(":hi{}", i), AttributeValue::N(hi));
                        pushdown.conditions.push(format!("{} <= :hi{}", path, i));
                    }
                }
                // No case-insensitive operators server-side
                Clause::Contains { .. } | Clause::AnyTag { .. } => {}
            }
        }

        pushdown
    }

    fn path(&mut self, i: usize, field: &str) -> String {
        self.names.insert("#doc".to_string(), DOC_ATTR.to_string());
        self.names.insert(format!("#f{}", i), field.to_string());
        format!("#doc.#f{}", i)
    }

    fn expression(&self) -> Option<String> {
        (!self.conditions.is_empty()).then(|| self.conditions.join(" AND "))
    }
}

/// A range bound as a DynamoDB number, widened to the storable range.
///
/// Every stored number is zero or has a magnitude in
/// `MIN_MAGNITUDE..=MAX_MAGNITUDE`, so a bound past the top excludes nothing
/// on its side and a bound closer to zero than `MIN_MAGNITUDE` selects the same
/// documents as zero. `None` means the bound needs no server-side condition;
/// the exact bound is still applied in-process.
fn storable_bound(bound: f64, upper: bool) -> Option<String> {
    if !bound.is_finite() {
        return None;
    }
    if (upper && bound >= MAX_MAGNITUDE) || (!upper && bound <= -MAX_MAGNITUDE) {
        return None;
    }
    if bound.abs() < MIN_MAGNITUDE {
        return Some("0".to_string());
    }
    let bound = bound.clamp(-MAX_MAGNITUDE, MAX_MAGNITUDE);
    // Plain digits only where they stay short
    if (1e-6..1e21).contains(&bound.abs()) {
        Some(bound.to_string())
    } else {
        Some(format!("{:e}", bound))
    }
}

// ========== JSON <-> ATTRIBUTE VALUE ==========

pub fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(document_to_map(map)),
    }
}

pub fn from_attribute(attr: &AttributeValue) -> Value {
    match attr {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(items) => Value::Array(items.iter().map(from_attribute).collect()),
        AttributeValue::M(map) => Value::Object(map_to_document(map)),
        AttributeValue::Ss(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(items) => Value::Array(items.iter().map(String::as_str).map(parse_number).collect()),
        // Binary attributes are never written by this service
        _ => Value::Null,
    }
}

fn document_to_map(doc: &Document) -> HashMap<String, AttributeValue> {
    doc.iter()
        .map(|(k, v)| (k.clone(), to_attribute(v)))
        .collect()
}

fn map_to_document(map: &HashMap<String, AttributeValue>) -> Document {
    map.iter()
        .map(|(k, v)| (k.clone(), from_attribute(v)))
        .collect()
}

fn parse_number(n: &str) -> Value {
    if let Ok(int) = n.parse::<i64>() {
        return Value::from(int);
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
