//! Unstructured typed objects
//!
//! Access methods and repository contexts travel as an envelope of a `type`
//! discriminator plus an arbitrary payload. The payload is kept as parsed
//! and only decoded into a concrete shape on request, so descriptors that
//! carry types this crate does not know survive a decode/encode cycle.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{Error, Result};

use super::access::{
    LocalFilesystemBlobAccess, LocalOciBlobAccess, OciRegistryAccess, RelativeOciAccess,
};
use super::repository::OciRegistryRepository;

const TYPE_KEY: &str = "type";

/// A concrete shape that can live inside an [`UnstructuredTypedObject`]
pub trait TypedObject: Serialize + DeserializeOwned {
    /// Wire value of the `type` discriminator
    const TYPE: &'static str;
}

/// Envelope of a `type` and its raw payload
///
/// Equality is structural: two objects are equal when their types match and
/// their payloads decode to the same value tree, regardless of key order or
/// formatting of the bytes they were parsed from.
#[derive(Debug, Clone)]
pub struct UnstructuredTypedObject {
    object_type: String,
    raw: Map<String, Value>,
}

impl UnstructuredTypedObject {
    /// Serialize a typed value into an envelope
    pub fn new<T: TypedObject>(value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(raw) => Ok(Self::from_parts(T::TYPE, raw)),
            other => Err(Error::invalid(
                "typed object",
                format!("{} serialized to a non-object value: {other}", T::TYPE),
            )),
        }
    }

    /// Build an envelope from an already parsed payload
    pub fn from_parts(object_type: impl Into<String>, mut raw: Map<String, Value>) -> Self {
        raw.remove(TYPE_KEY);
        Self {
            object_type: object_type.into(),
            raw,
        }
    }

    /// Parse an envelope from JSON or YAML bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let obj = match first_non_whitespace(data) {
            Some(b'{') => serde_json::from_slice(data)?,
            _ => serde_yaml_ng::from_slice(data)?,
        };
        Ok(obj)
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// The full object including the `type` key
    pub fn to_value(&self) -> Value {
        let mut map = self.raw.clone();
        map.insert(TYPE_KEY.to_string(), Value::String(self.object_type.clone()));
        Value::Object(map)
    }

    /// Decode the payload into a concrete shape
    ///
    /// Fails with [`Error::Invalid`] when the envelope carries a different
    /// type or the payload does not fit the shape.
    pub fn decode_into<T: TypedObject>(&self) -> Result<T> {
        if self.object_type != T::TYPE {
            return Err(Error::invalid(
                "typed object",
                format!("expected type '{}' but found '{}'", T::TYPE, self.object_type),
            ));
        }
        serde_json::from_value(Value::Object(self.raw.clone())).map_err(|e| {
            Error::invalid(
                "typed object",
                format!("unable to decode '{}': {e}", self.object_type),
            )
        })
    }
}

impl PartialEq for UnstructuredTypedObject {
    fn eq(&self, other: &Self) -> bool {
        self.object_type == other.object_type && self.raw == other.raw
    }
}

impl Serialize for UnstructuredTypedObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UnstructuredTypedObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut raw = Map::<String, Value>::deserialize(deserializer)?;
        let object_type = match raw.remove(TYPE_KEY) {
            Some(Value::String(t)) if !t.is_empty() => t,
            Some(_) => return Err(D::Error::custom("'type' must be a non-empty string")),
            None => return Err(D::Error::missing_field(TYPE_KEY)),
        };
        Ok(Self { object_type, raw })
    }
}

fn first_non_whitespace(data: &[u8]) -> Option<u8> {
    data.iter().copied().find(|b| !b.is_ascii_whitespace())
}

type Validator = fn(&UnstructuredTypedObject) -> Result<()>;

fn validate_as<T: TypedObject>(obj: &UnstructuredTypedObject) -> Result<()> {
    obj.decode_into::<T>().map(|_| ())
}

/// Set of known type names for one family of typed objects
///
/// Unknown types pass validation untouched; known types must decode into
/// their registered shape.
#[derive(Debug, Clone, Default)]
pub struct TypeScheme {
    validators: HashMap<String, Validator>,
}

impl TypeScheme {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: TypedObject>(&mut self) -> &mut Self {
        self.validators
            .insert(T::TYPE.to_string(), validate_as::<T> as Validator);
        self
    }

    pub fn is_known(&self, object_type: &str) -> bool {
        self.validators.contains_key(object_type)
    }

    pub fn validate(&self, obj: &UnstructuredTypedObject) -> Result<()> {
        match self.validators.get(obj.object_type()) {
            Some(validate) => validate(obj),
            None => Ok(()),
        }
    }
}

/// The type schemes used to validate descriptors
///
/// Access methods and repository contexts share type names (`ociRegistry`
/// names both), so each family has its own scheme. Built by whoever wires
/// the process together and handed to the [`Codec`](super::codec::Codec).
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    pub access: TypeScheme,
    pub repositories: TypeScheme,
}

impl TypeRegistry {
    /// A registry with no known types; every envelope passes
    pub fn empty() -> Self {
        Self {
            access: TypeScheme::new(),
            repositories: TypeScheme::new(),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        let mut access = TypeScheme::new();
        access
            .register::<OciRegistryAccess>()
            .register::<LocalOciBlobAccess>()
            .register::<LocalFilesystemBlobAccess>()
            .register::<RelativeOciAccess>();

        let mut repositories = TypeScheme::new();
        repositories.register::<OciRegistryRepository>();

        Self {
            access,
            repositories,
        }
    }
}
