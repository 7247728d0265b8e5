//! Dispatch tables for the stock replicated object types.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::args::{arg, expect_arity, to_value};
use crate::dispatch::DispatchTable;
use crate::error::DispatchError;

/// State of a replicated counter.
pub type Counter = i64;

/// State of a replicated string-keyed map.
pub type SmrMap = BTreeMap<String, Value>;

/// Counter operations.
///
/// | operation | kind | arguments | result |
/// |---|---|---|---|
/// | `get` | accessor | | current value |
/// | `add` | mutator | `delta: i64` | |
/// | `increment` | mutator-accessor | | value after incrementing |
/// | `reset` | mutator | | |
pub fn counter() -> Result<DispatchTable<Counter>, DispatchError> {
    DispatchTable::builder("counter")
        .strict(true)
        .accessor("get", |n: &Counter, args| {
            expect_arity(args, 0)?;
            to_value(*n)
        })
        .mutator("add", |n: &mut Counter, args| {
            expect_arity(args, 1)?;
            *n = n.wrapping_add(arg::<i64>(args, 0)?);
            Ok(())
        })
        .mutator_accessor("increment", |n: &mut Counter, args| {
            expect_arity(args, 0)?;
            *n = n.wrapping_add(1);
            to_value(*n)
        })
        .mutator("reset", |n: &mut Counter, _| {
            *n = 0;
            Ok(())
        })
        .build()
}

/// Map operations.
///
/// `put` and `remove` return the previous value (or `null`); `insert` is
/// the blind-write form of `put`.
pub fn map() -> Result<DispatchTable<SmrMap>, DispatchError> {
    DispatchTable::builder("map")
        .strict(true)
        .accessor("get", |m: &SmrMap, args| {
            expect_arity(args, 1)?;
            let key: String = arg(args, 0)?;
            Ok(m.get(&key).cloned().unwrap_or(Value::Null))
        })
        .accessor("contains_key", |m: &SmrMap, args| {
            expect_arity(args, 1)?;
            to_value(m.contains_key(&arg::<String>(args, 0)?))
        })
        .accessor("size", |m: &SmrMap, _| to_value(m.len()))
        .accessor("keys", |m: &SmrMap, _| to_value(m.keys().collect::<Vec<_>>()))
        .mutator_accessor("put", |m: &mut SmrMap, args| {
            expect_arity(args, 2)?;
            let key: String = arg(args, 0)?;
            Ok(m.insert(key, args[1].clone()).unwrap_or(Value::Null))
        })
        .mutator("insert", |m: &mut SmrMap, args| {
            expect_arity(args, 2)?;
            m.insert(arg(args, 0)?, args[1].clone());
            Ok(())
        })
        .mutator_accessor("remove", |m: &mut SmrMap, args| {
            expect_arity(args, 1)?;
            Ok(m.remove(&arg::<String>(args, 0)?).unwrap_or(Value::Null))
        })
        .mutator("clear", |m: &mut SmrMap, _| {
            m.clear();
            Ok(())
        })
        .build()
}
