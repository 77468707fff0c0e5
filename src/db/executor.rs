/*
 * Copyright 2020 Actyx AG
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
use super::{
    document::DocumentStore,
    parser::{ColumnRef, Condition, Delete, Insert, Join, Operand, Projection, Select, Statement, Update},
    timestamp, Execution, Record,
};
use anyhow::Result;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use tracing::{field, trace, trace_span};

pub enum Outcome {
    Rows(Vec<Record>),
    Changed(Execution),
}

/// Apply one parsed statement; mutations are persisted exactly once before returning,
/// and a mutation whose save fails leaves no trace in memory
pub fn execute(store: &mut DocumentStore, stmt: &Statement, params: &[Value]) -> Result<Outcome> {
    let span = trace_span!("execute", table = stmt.table(), changes = field::Empty);
    let _guard = span.enter();
    let mut params = Params::new(params);
    match stmt {
        Statement::Select(sel) => Ok(Outcome::Rows(select(store, sel, &mut params))),
        Statement::Insert(ins) => {
            let exec = store.commit(|store| insert(store, ins, &mut params))?;
            Ok(Outcome::Changed(exec))
        }
        Statement::Update(upd) => {
            let exec = store.commit(|store| update(store, upd, &mut params))?;
            span.record("changes", &exec.changes);
            Ok(Outcome::Changed(exec))
        }
        Statement::Delete(del) => {
            let exec = store.commit(|store| delete(store, del, &mut params))?;
            span.record("changes", &exec.changes);
            Ok(Outcome::Changed(exec))
        }
    }
}

/// Positional parameters, consumed left to right as placeholders are encountered
struct Params<'p> {
    values: &'p [Value],
    next: usize,
}

impl<'p> Params<'p> {
    fn new(values: &'p [Value]) -> Self {
        Self { values, next: 0 }
    }

    fn resolve(&mut self, operand: &Operand) -> Value {
        match operand {
            Operand::Placeholder => {
                let value = self.values.get(self.next).cloned().unwrap_or(Value::Null);
                self.next += 1;
                value
            }
            Operand::Literal(v) => v.clone(),
            Operand::Now => Value::from(timestamp()),
        }
    }
}

/// How qualified column names map onto the (possibly joined) record fields
struct Scope<'s> {
    join: Option<&'s Join>,
}

impl<'s> Scope<'s> {
    fn field(&self, column: &ColumnRef) -> String {
        match (&column.qualifier, self.join) {
            (Some(q), Some(join)) if *q == join.alias || *q == join.table => {
                format!("{}_{}", join.alias, column.name)
            }
            _ => column.name.clone(),
        }
    }

    fn is_join_side(&self, column: &ColumnRef) -> bool {
        match (&column.qualifier, self.join) {
            (Some(q), Some(join)) => *q == join.alias || *q == join.table,
            _ => false,
        }
    }
}

enum Test {
    IsNull,
    IsNotNull,
    Equals(Value),
}

/// Resolve placeholders once so that every record is tested against the same values
fn bind(conditions: &[Condition], scope: &Scope, params: &mut Params) -> Vec<(String, Test)> {
    conditions
        .iter()
        .map(|cond| match cond {
            Condition::IsNull(c) => (scope.field(c), Test::IsNull),
            Condition::IsNotNull(c) => (scope.field(c), Test::IsNotNull),
            Condition::Equals(c, op) => (scope.field(c), Test::Equals(params.resolve(op))),
        })
        .collect()
}

fn matches(record: &Record, conditions: &[(String, Test)]) -> bool {
    conditions.iter().all(|(field, test)| {
        let value = record.get(field);
        match test {
            Test::IsNull => is_null(value),
            Test::IsNotNull => !is_null(value),
            Test::Equals(expected) => equals(value, expected),
        }
    })
}

fn is_null(value: Option<&Value>) -> bool {
    value.map(Value::is_null).unwrap_or(true)
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => a.as_f64() == b.as_f64(),
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Equality as used in WHERE
///
/// 0 and 1 also match stored booleans (and the other way round), since files written
/// by earlier versions keep flags such as `is_current` as numbers. Numbers compare
/// with numeric strings, and a NULL parameter matches a missing field.
fn equals(record: Option<&Value>, expected: &Value) -> bool {
    let record = record.unwrap_or(&Value::Null);
    match (record, expected) {
        (Value::Bool(r), Value::Number(n)) | (Value::Number(n), Value::Bool(r)) => {
            n.as_f64() == Some(flag(*r))
        }
        (Value::Null, Value::Null) => true,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Number(x), Value::String(s)) | (Value::String(s), Value::Number(x)) => {
            s.trim().parse::<f64>().ok() == x.as_f64()
        }
        (r, e) => r == e,
    }
}

/// Key equality for joins: no type coercion beyond integer/float
fn same_key(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => numbers_equal(x, y),
        (Some(Value::Null), _) | (_, Some(Value::Null)) | (None, _) | (_, None) => false,
        (Some(x), Some(y)) => x == y,
    }
}

fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) | Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(_) => 3,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(flag(*b)),
        _ => None,
    }
}

/// Natural ordering: NULL first, then numbers and booleans, then strings
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => match (numeric(x), numeric(y)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => rank(a).cmp(&rank(b)),
        },
        _ => rank(a).cmp(&rank(b)),
    }
}

fn as_count(value: Value) -> Option<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn select(store: &DocumentStore, sel: &Select, params: &mut Params) -> Vec<Record> {
    let scope = Scope {
        join: sel.join.as_ref(),
    };
    let primary = sel.alias.as_deref().unwrap_or(&sel.table);
    let mut rows = store.table(&sel.table).to_vec();

    if let Some(join) = &sel.join {
        let joined = store.table(&join.table);
        let (outer, inner) = if scope.is_join_side(&join.left) && !scope.is_join_side(&join.right) {
            (&join.right.name, &join.left.name)
        } else {
            (&join.left.name, &join.right.name)
        };
        let labels = sel
            .projection
            .iter()
            .filter_map(|p| match p {
                Projection::Column {
                    column,
                    label: Some(label),
                } if scope.is_join_side(column) => Some((&column.name, label)),
                _ => None,
            })
            .collect::<Vec<_>>();
        for row in rows.iter_mut() {
            let found = joined.iter().find(|j| same_key(j.get(inner), row.get(outer)));
            if let Some(found) = found {
                for (key, value) in found {
                    row.insert(format!("{}_{}", join.alias, key), value.clone());
                }
                for (name, label) in &labels {
                    let value = found.get(*name).cloned().unwrap_or(Value::Null);
                    row.insert((*label).clone(), value);
                }
            }
        }
    }

    for p in &sel.projection {
        if let Projection::Column {
            column,
            label: Some(label),
        } = p
        {
            let own = column.qualifier.as_deref().map(|q| q == primary).unwrap_or(true);
            if own && !scope.is_join_side(column) {
                for row in rows.iter_mut() {
                    let value = row.get(&column.name).cloned().unwrap_or(Value::Null);
                    row.insert(label.clone(), value);
                }
            }
        }
    }

    let conditions = bind(&sel.conditions, &scope, params);
    rows.retain(|row| matches(row, &conditions));

    if let Some(order) = &sel.order_by {
        let field = scope.field(&order.column);
        // stable, so ties keep their stored order
        rows.sort_by(|a, b| {
            let o = compare(a.get(&field), b.get(&field));
            if order.descending {
                o.reverse()
            } else {
                o
            }
        });
    }

    let limit = sel.limit.as_ref().map(|l| params.resolve(l)).and_then(as_count);
    let offset = sel
        .offset
        .as_ref()
        .map(|o| params.resolve(o))
        .and_then(as_count)
        .unwrap_or(0);
    if offset > 0 || limit.is_some() {
        rows = rows
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
    }
    trace!(rows = rows.len(), "selected");
    rows
}

fn insert(store: &mut DocumentStore, ins: &Insert, params: &mut Params) -> Execution {
    let mut record = Record::new();
    record.insert("id".to_owned(), Value::from(store.next_id(&ins.table)));
    for (idx, column) in ins.columns.iter().enumerate() {
        let value = ins
            .values
            .get(idx)
            .map(|op| params.resolve(op))
            .unwrap_or(Value::Null);
        record.insert(column.clone(), value);
    }
    if !record.contains_key("created_at") {
        record.insert("created_at".to_owned(), Value::from(timestamp()));
    }
    let last_insert_id = record["id"].clone();
    store.table_mut(&ins.table).push(record);
    Execution {
        changes: 1,
        last_insert_id,
    }
}

fn update(store: &mut DocumentStore, upd: &Update, params: &mut Params) -> Execution {
    let assignments = upd
        .assignments
        .iter()
        .map(|(column, op)| (column.clone(), params.resolve(op)))
        .collect::<Vec<_>>();
    let conditions = bind(&upd.conditions, &Scope { join: None }, params);
    let mut changes = 0;
    if store.has_table(&upd.table) {
        for row in store.table_mut(&upd.table).iter_mut() {
            if matches(row, &conditions) {
                for (column, value) in &assignments {
                    row.insert(column.clone(), value.clone());
                }
                changes += 1;
            }
        }
    }
    Execution {
        changes,
        last_insert_id: Value::Null,
    }
}

fn delete(store: &mut DocumentStore, del: &Delete, params: &mut Params) -> Execution {
    let conditions = bind(&del.conditions, &Scope { join: None }, params);
    let mut changes = 0;
    if store.has_table(&del.table) {
        let table = store.table_mut(&del.table);
        let before = table.len();
        table.retain(|row| !matches(row, &conditions));
        changes = before - table.len();
    }
    Execution {
        changes,
        last_insert_id: Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, Document, Execution, Persistence};
    use crate::params;
    use anyhow::Result;
    use serde_json::{json, Value};
    use std::{cell::Cell, rc::Rc};

    /// keeps the document in memory and counts how often it was written
    struct Counting {
        saves: Rc<Cell<usize>>,
        failing: Rc<Cell<bool>>,
        stored: Option<Document>,
    }

    impl Persistence for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn load(&mut self) -> Result<Option<Document>> {
            Ok(self.stored.clone())
        }
        fn save(&mut self, doc: &Document) -> Result<()> {
            if self.failing.get() {
                anyhow::bail!("disk full");
            }
            self.saves.set(self.saves.get() + 1);
            self.stored = Some(doc.clone());
            Ok(())
        }
    }

    fn db_with(doc: Value) -> (Database, Rc<Cell<usize>>) {
        let (db, saves, _) = flaky_db_with(doc);
        (db, saves)
    }

    /// like `db_with`, plus a switch that makes every save fail
    fn flaky_db_with(doc: Value) -> (Database, Rc<Cell<usize>>, Rc<Cell<bool>>) {
        let saves = Rc::new(Cell::new(0));
        let failing = Rc::new(Cell::new(false));
        let backend = Counting {
            saves: saves.clone(),
            failing: failing.clone(),
            stored: Some(serde_json::from_value(doc).unwrap()),
        };
        (Database::open(Box::new(backend)).unwrap(), saves, failing)
    }

    fn ids(rows: &[crate::db::Record]) -> Vec<Value> {
        rows.iter().map(|r| r["id"].clone()).collect()
    }

    #[test]
    fn select_never_saves_and_mutations_save_once() {
        let (db, saves) = db_with(json!({ "calculations": [] }));
        db.prepare("SELECT * FROM calculations").all(params![]).unwrap();
        assert_eq!(saves.get(), 0);

        db.prepare("INSERT INTO calculations (kunde) VALUES (?)").run(params!["Acme"]).unwrap();
        assert_eq!(saves.get(), 1);
        db.prepare("UPDATE calculations SET kunde = ? WHERE id = ?").run(params!["B", 1]).unwrap();
        assert_eq!(saves.get(), 2);
        db.prepare("DELETE FROM calculations WHERE id = ?").run(params![1]).unwrap();
        assert_eq!(saves.get(), 3);
        db.prepare("SELECT nonsense").run(params![]).unwrap();
        assert_eq!(saves.get(), 3);
    }

    #[test]
    fn insert_fills_id_and_created_at() {
        let (db, _) = db_with(json!({ "counters": { "offers": 41 } }));
        let exec = db
            .prepare("INSERT INTO offers (kunde, notes, status, created_at) VALUES (?, ?, 'pending', NULL)")
            .run(params!["Acme"])
            .unwrap();
        assert_eq!(
            exec,
            Execution {
                changes: 1,
                last_insert_id: Value::from(42)
            }
        );
        let row = db.prepare("SELECT * FROM offers").get(params![]).unwrap().unwrap();
        // a parameter that was not supplied binds as NULL
        assert_eq!(row["notes"], Value::Null);
        // an explicit NULL created_at is kept
        assert_eq!(row["created_at"], Value::Null);

        db.prepare("INSERT INTO offers (kunde) VALUES ('Beta')").run(params![]).unwrap();
        let row = db
            .prepare("SELECT * FROM offers WHERE kunde = 'Beta'")
            .get(params![])
            .unwrap()
            .unwrap();
        assert!(row["created_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn explicit_id_overrides_allocation() {
        let (db, _) = db_with(json!({}));
        let exec = db
            .prepare("INSERT INTO users (id, email, active) VALUES (?, ?, ?)")
            .run(params!["a1b2", "admin@fhd.agency", 1])
            .unwrap();
        assert_eq!(exec.last_insert_id, Value::from("a1b2"));
        db.with_document(|doc| assert_eq!(doc.counters["users"], 1));
        let user = db
            .prepare("SELECT id, name, email, role FROM users WHERE id = ? AND active = 1")
            .get(params!["a1b2"])
            .unwrap()
            .unwrap();
        assert_eq!(user["email"], "admin@fhd.agency");
    }

    #[test]
    fn where_is_null_ignores_insertion_order() {
        let (db, _) = db_with(json!({
            "users": [
                { "id": 1, "name": "gone", "deleted_at": "2025-01-01T00:00:00.000Z" },
                { "id": 2, "name": "kept" },
                { "id": 3, "name": "explicit null", "deleted_at": null },
            ]
        }));
        let live = db
            .prepare("SELECT * FROM users WHERE deleted_at IS NULL")
            .all(params![])
            .unwrap();
        assert_eq!(ids(&live), vec![json!(2), json!(3)]);
        let gone = db
            .prepare("SELECT * FROM users WHERE deleted_at IS NOT NULL")
            .all(params![])
            .unwrap();
        assert_eq!(ids(&gone), vec![json!(1)]);
    }

    #[test]
    fn zero_and_one_match_booleans() {
        let (db, _) = db_with(json!({
            "calculations": [
                { "id": 1, "calculation_uuid": "u", "is_current": 0 },
                { "id": 2, "calculation_uuid": "u", "is_current": true },
                { "id": 3, "calculation_uuid": "v", "is_current": 1 },
                { "id": 4, "calculation_uuid": "v", "is_current": false },
            ]
        }));
        let current = db
            .prepare("SELECT * FROM calculations WHERE is_current = 1")
            .all(params![])
            .unwrap();
        assert_eq!(ids(&current), vec![json!(2), json!(3)]);
        let current = db
            .prepare("SELECT * FROM calculations WHERE calculation_uuid = ? AND is_current = TRUE")
            .all(params!["v"])
            .unwrap();
        assert_eq!(ids(&current), vec![json!(3)]);
        let old = db
            .prepare("SELECT * FROM calculations WHERE is_current = ?")
            .all(params![false])
            .unwrap();
        assert_eq!(ids(&old), vec![json!(1), json!(4)]);
    }

    #[test]
    fn equality_is_loose_between_numbers_and_text() {
        let (db, _) = db_with(json!({
            "garment_data": [
                { "id": 1, "calculation_id": 7 },
                { "id": 2, "calculation_id": "7" },
                { "id": 3, "calculation_id": 7.0 },
                { "id": 4, "calculation_id": 8 },
            ]
        }));
        let rows = db
            .prepare("SELECT * FROM garment_data WHERE calculation_id = ?")
            .all(params![7])
            .unwrap();
        assert_eq!(ids(&rows), vec![json!(1), json!(2), json!(3)]);
        let rows = db
            .prepare("SELECT * FROM garment_data WHERE calculation_id = '8'")
            .all(params![])
            .unwrap();
        assert_eq!(ids(&rows), vec![json!(4)]);
    }

    #[test]
    fn left_join_merges_alias_fields() {
        let (db, _) = db_with(json!({
            "users": [
                { "id": "u1", "name": "Administrator", "email": "admin@fhd.agency" },
            ],
            "calculations": [
                { "id": 1, "kunde": "Acme", "created_by": "u1" },
                { "id": 2, "kunde": "Nobody", "created_by": "u9" },
                { "id": 3, "kunde": "Old", "created_by": "u1", "deleted_at": "2025-02-02T00:00:00.000Z" },
            ]
        }));
        let rows = db
            .prepare(
                "SELECT c.*, u.name as created_by_name, u.email as created_by_email
                 FROM calculations c
                 LEFT JOIN users u ON c.created_by = u.id
                 WHERE c.deleted_at IS NULL
                 ORDER BY c.id DESC",
            )
            .all(params![])
            .unwrap();
        assert_eq!(ids(&rows), vec![json!(2), json!(1)]);
        assert_eq!(rows[1]["created_by_name"], "Administrator");
        assert_eq!(rows[1]["created_by_email"], "admin@fhd.agency");
        assert_eq!(rows[1]["u_name"], "Administrator");
        assert_eq!(rows[1]["u_id"], "u1");
        assert!(rows[0].get("created_by_name").is_none());

        // the condition may also address the joined alias
        let rows = db
            .prepare("SELECT c.* FROM calculations c LEFT JOIN users u ON u.id = c.created_by WHERE u.name = ?")
            .all(params!["Administrator"])
            .unwrap();
        assert_eq!(ids(&rows), vec![json!(1), json!(3)]);
    }

    #[test]
    fn join_table_name_qualifies_like_the_alias() {
        let (db, _) = db_with(json!({
            "users": [{ "id": "u1", "name": "Administrator" }, { "id": "u2", "name": "Anna" }],
            "calculations": [
                { "id": 1, "created_by": "u1" },
                { "id": 2, "created_by": "u2" },
            ]
        }));
        let rows = db
            .prepare("SELECT c.* FROM calculations c LEFT JOIN users u ON c.created_by = u.id WHERE users.name = ?")
            .all(params!["Anna"])
            .unwrap();
        assert_eq!(ids(&rows), vec![json!(2)]);
    }

    #[test_env_log::test]
    fn failed_save_leaves_no_trace() {
        let (db, saves, failing) = flaky_db_with(json!({
            "calculations": [{ "id": 1, "calculation_uuid": "c-1", "kunde": "Acme", "is_current": true }],
            "counters": { "calculations": 1 }
        }));
        failing.set(true);
        assert!(db
            .prepare("INSERT INTO calculations (calculation_uuid, kunde, version, is_current) VALUES (?, ?, 1, TRUE)")
            .run(params!["u-1", "Beta"])
            .is_err());
        assert!(db
            .prepare("UPDATE calculations SET kunde = ? WHERE id = ?")
            .run(params!["Gamma", 1])
            .is_err());
        assert!(db.prepare("DELETE FROM calculations WHERE id = ?").run(params![1]).is_err());
        assert!(db.bump_counter("offer_number_2025").is_err());
        assert_eq!(saves.get(), 0);

        failing.set(false);
        let rows = db.prepare("SELECT * FROM calculations").all(params![]).unwrap();
        assert_eq!(ids(&rows), vec![json!(1)]);
        assert_eq!(rows[0]["kunde"], "Acme");
        assert!(db.with_document(|doc| doc.table("counters_table").is_empty()));

        // the id and the counter value of the failed writes are handed out again
        let exec = db
            .prepare("INSERT INTO calculations (kunde) VALUES (?)")
            .run(params!["Beta"])
            .unwrap();
        assert_eq!(exec.last_insert_rowid(), Some(2));
        assert_eq!(db.bump_counter("offer_number_2025").unwrap(), 1);
    }

    #[test]
    fn primary_column_labels() {
        let (db, _) = db_with(json!({ "calculations": [{ "id": 1, "kunde": "Acme" }] }));
        let row = db
            .prepare("SELECT id, kunde AS title FROM calculations")
            .get(params![])
            .unwrap()
            .unwrap();
        assert_eq!(row["title"], "Acme");
        assert_eq!(row["kunde"], "Acme");
    }

    #[test]
    fn order_is_stable_with_nulls_first() {
        let (db, _) = db_with(json!({
            "offers": [
                { "id": 1, "valid_until": "2025-03-01" },
                { "id": 2 },
                { "id": 3, "valid_until": "2025-01-01" },
                { "id": 4, "valid_until": "2025-03-01" },
                { "id": 5, "valid_until": null },
            ]
        }));
        let asc = db
            .prepare("SELECT * FROM offers ORDER BY valid_until")
            .all(params![])
            .unwrap();
        assert_eq!(ids(&asc), vec![json!(2), json!(5), json!(3), json!(1), json!(4)]);
        let desc = db
            .prepare("SELECT * FROM offers ORDER BY valid_until DESC")
            .all(params![])
            .unwrap();
        assert_eq!(ids(&desc), vec![json!(1), json!(4), json!(3), json!(2), json!(5)]);
    }

    #[test]
    fn numbers_sort_numerically() {
        let (db, _) = db_with(json!({
            "garment_data": [
                { "id": 1, "item_number": 10 },
                { "id": 2, "item_number": 2 },
                { "id": 3, "item_number": 1.5 },
            ]
        }));
        let rows = db
            .prepare("SELECT * FROM garment_data ORDER BY item_number ASC")
            .all(params![])
            .unwrap();
        assert_eq!(ids(&rows), vec![json!(3), json!(2), json!(1)]);
    }

    #[test]
    fn limit_and_offset_follow_where_parameters() {
        let rows = (1..=6)
            .map(|i| {
                let action = if i % 2 == 0 { "CREATE" } else { "DELETE" };
                json!({ "id": i, "action": action })
            })
            .collect::<Vec<_>>();
        let (db, _) = db_with(json!({ "calculation_logs": rows }));
        let page = db
            .prepare("SELECT * FROM calculation_logs WHERE action = ? ORDER BY id DESC LIMIT ? OFFSET ?")
            .all(params!["CREATE", 2, 1])
            .unwrap();
        assert_eq!(ids(&page), vec![json!(4), json!(2)]);
        let first = db
            .prepare("SELECT * FROM calculation_logs ORDER BY id ASC LIMIT 1")
            .all(params![])
            .unwrap();
        assert_eq!(ids(&first), vec![json!(1)]);
    }

    #[test]
    fn update_consumes_set_parameters_first() {
        let (db, _) = db_with(json!({
            "calculations": [
                { "id": 1, "calculation_uuid": "u", "kunde": "A" },
                { "id": 2, "calculation_uuid": "u", "kunde": "A", "deleted_at": "x" },
                { "id": 3, "calculation_uuid": "w", "kunde": "C" },
            ]
        }));
        let exec = db
            .prepare(
                "UPDATE calculations
                 SET kunde = ?, modified_at = datetime('now')
                 WHERE calculation_uuid = ? AND deleted_at IS NULL",
            )
            .run(params!["Renamed", "u"])
            .unwrap();
        assert_eq!(exec.changes, 1);
        let rows = db.prepare("SELECT * FROM calculations").all(params![]).unwrap();
        assert_eq!(rows[0]["kunde"], "Renamed");
        assert!(rows[0]["modified_at"].is_string());
        assert_eq!(rows[1]["kunde"], "A");
        assert_eq!(rows[2]["kunde"], "C");

        let exec = db
            .prepare("UPDATE missing_table SET x = 1 WHERE id = 1")
            .run(params![])
            .unwrap();
        assert_eq!(exec.changes, 0);
        db.with_document(|doc| assert!(!doc.tables.contains_key("missing_table")));
    }

    #[test]
    fn delete_reports_removed_rows() {
        let (db, _) = db_with(json!({
            "garment_data": [
                { "id": 1, "calculation_id": 1 },
                { "id": 2, "calculation_id": 1 },
                { "id": 3, "calculation_id": 2 },
            ]
        }));
        let exec = db
            .prepare("DELETE FROM garment_data WHERE calculation_id = ?")
            .run(params![1])
            .unwrap();
        assert_eq!(exec.changes, 2);
        let left = db.prepare("SELECT * FROM garment_data").all(params![]).unwrap();
        assert_eq!(ids(&left), vec![json!(3)]);
    }
}
