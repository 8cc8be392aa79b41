//! Deterministic cache key derivation from call arguments
//!
//! Arguments are rendered into a typed canonical text form and hashed with
//! SHA-256. The rendering only depends on the argument values, never on
//! process state, so keys written by one run stay valid in the next.

use crate::memo::types::{CacheKey, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Positional and keyword arguments of one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from positional arguments only
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            args: values.into_iter().map(Into::into).collect(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Positional argument at `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument by name
    pub fn named(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

/// Derives cache keys from [`CallArgs`]
///
/// Two argument sets that render to the same canonical text share a key.
/// The rendering is typed (`i:1` and `f:1.0` differ) so this only happens
/// for values that are indistinguishable through [`Value`].
pub struct KeyDeriver;

impl KeyDeriver {
    /// Derive the cache key for a call
    pub fn derive(call: &CallArgs) -> CacheKey {
        let canonical = Self::canonical(call);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Canonical text rendering of a call, the input of [`KeyDeriver::derive`]
    pub fn canonical(call: &CallArgs) -> String {
        let mut out = String::from("(");
        for (i, value) in call.args.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            render(value, &mut out);
        }
        out.push_str(")\u{1f}{");
        // BTreeMap iterates in name order
        for (i, (name, value)) in call.kwargs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            render_text(name, &mut out);
            out.push('=');
            render(value, &mut out);
        }
        out.push('}');
        out
    }
}

fn render(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "b:{}", b);
        }
        Value::Int(i) => {
            let _ = write!(out, "i:{}", i);
        }
        Value::Float(f) => render_float(*f, out),
        Value::Text(s) => {
            out.push_str("s:");
            render_text(s, out);
        }
        Value::Bytes(bytes) => {
            out.push_str("x:");
            for b in bytes {
                let _ = write!(out, "{:02x}", b);
            }
        }
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render(item, out);
            }
            out.push(']');
        }
        Value::Map(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render_text(k, out);
                out.push(':');
                render(v, out);
            }
            out.push('}');
        }
        Value::Tensor(t) => {
            out.push_str("t:");
            for (i, dim) in t.shape().iter().enumerate() {
                if i > 0 {
                    out.push('x');
                }
                let _ = write!(out, "{}", dim);
            }
            out.push('(');
            for (i, f) in t.data().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render_float(*f, out);
            }
            out.push(')');
        }
    }
}

// Raw IEEE-754 bits: equal bit patterns render the same, -0.0 and 0.0 differ.
fn render_float(f: f64, out: &mut String) {
    let _ = write!(out, "f:{:016x}", f.to_bits());
}

/// Quoted string with `"` and `\` escaped and control characters as `\uXXXX`
fn render_text(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() && (c as u32) < 0x80 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::types::Tensor;

    #[test]
    fn test_derive_is_deterministic() {
        let call = CallArgs::new().arg(2).arg("x").kwarg("scale", 0.5);
        assert_eq!(KeyDeriver::derive(&call), KeyDeriver::derive(&call.clone()));
    }

    #[test]
    fn test_known_digest_is_stable() {
        // A rendering change orphans every persisted row
        let call = CallArgs::positional([2i64]);
        assert_eq!(KeyDeriver::canonical(&call), "(i:2)\u{1f}{}");
        assert_eq!(
            KeyDeriver::derive(&call),
            "0e2426be379a2a45740b842b1d1c86dfecdf1d124b025e8d07ab90e2742a9d98"
        );
    }

    #[test]
    fn test_argument_order_matters() {
        let a = CallArgs::positional([1i64, 2]);
        let b = CallArgs::positional([2i64, 1]);
        assert_ne!(KeyDeriver::derive(&a), KeyDeriver::derive(&b));
    }

    #[test]
    fn test_kwarg_insertion_order_does_not_matter() {
        let a = CallArgs::new().kwarg("a", 1).kwarg("b", 2);
        let b = CallArgs::new().kwarg("b", 2).kwarg("a", 1);
        assert_eq!(KeyDeriver::derive(&a), KeyDeriver::derive(&b));
    }

    #[test]
    fn test_positional_and_keyword_are_distinct() {
        let a = CallArgs::new().arg(1);
        let b = CallArgs::new().kwarg("x", 1);
        assert_ne!(KeyDeriver::derive(&a), KeyDeriver::derive(&b));
    }

    #[test]
    fn test_types_are_distinguished() {
        let int = CallArgs::new().arg(1);
        let float = CallArgs::new().arg(1.0);
        let text = CallArgs::new().arg("1");
        assert_ne!(KeyDeriver::derive(&int), KeyDeriver::derive(&float));
        assert_ne!(KeyDeriver::derive(&int), KeyDeriver::derive(&text));
    }

    #[test]
    fn test_text_escaping_prevents_splicing() {
        // "a","b" must not collide with a single string containing the separator
        let two = CallArgs::new().arg("a").arg("b");
        let one = CallArgs::new().arg("a\",s:\"b");
        assert_ne!(KeyDeriver::derive(&two), KeyDeriver::derive(&one));
    }

    #[test]
    fn test_nested_values_render() {
        let tensor = Tensor::new(vec![1, 2], vec![1.0, 2.5]).unwrap();
        let call = CallArgs::new()
            .arg(Value::List(vec![Value::Int(1), Value::Null]))
            .arg(tensor)
            .arg(vec![0xabu8, 0x01]);

        assert_eq!(
            KeyDeriver::canonical(&call),
            "([i:1,null],t:1x2(f:3ff0000000000000,f:4004000000000000),x:ab01)\u{1f}{}"
        );
    }

    #[test]
    fn test_text_and_float_rendering() {
        let call = CallArgs::new()
            .arg("a\"b\\c\n\u{7f}é")
            .arg(-0.0)
            .kwarg("k\"", 0.5);
        assert_eq!(
            KeyDeriver::canonical(&call),
            "(s:\"a\\\"b\\\\c\\u000a\\u007fé\",f:8000000000000000)\u{1f}{\"k\\\"\"=f:3fe0000000000000}"
        );

        let zero = CallArgs::new().arg(0.0);
        let negative_zero = CallArgs::new().arg(-0.0);
        assert_ne!(KeyDeriver::derive(&zero), KeyDeriver::derive(&negative_zero));
    }
}
