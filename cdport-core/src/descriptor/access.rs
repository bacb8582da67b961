//! Access methods of resources and sources

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::typed::{TypedObject, UnstructuredTypedObject};

/// Artifact stored as an image in an OCI registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciRegistryAccess {
    pub image_reference: String,
}

impl TypedObject for OciRegistryAccess {
    const TYPE: &'static str = "ociRegistry";
}

/// Blob stored as a layer of the component descriptor's own manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalOciBlobAccess {
    pub digest: String,
}

impl TypedObject for LocalOciBlobAccess {
    const TYPE: &'static str = "localOciBlob";
}

/// Blob stored in the `blobs/` directory of a component archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFilesystemBlobAccess {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl TypedObject for LocalFilesystemBlobAccess {
    const TYPE: &'static str = "localFilesystemBlob";
}

/// OCI artifact addressed relative to a configured artifact repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeOciAccess {
    pub reference: String,
}

impl TypedObject for RelativeOciAccess {
    const TYPE: &'static str = "relativeOciReference";
}

/// Decoded view of an access envelope
///
/// Types this crate does not know end up in [`Access::Unknown`] with their
/// payload intact.
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    OciRegistry(OciRegistryAccess),
    LocalOciBlob(LocalOciBlobAccess),
    LocalFilesystemBlob(LocalFilesystemBlobAccess),
    RelativeOciReference(RelativeOciAccess),
    Unknown(UnstructuredTypedObject),
}

impl Access {
    pub fn from_unstructured(obj: &UnstructuredTypedObject) -> Result<Self> {
        let access = match obj.object_type() {
            OciRegistryAccess::TYPE => Access::OciRegistry(obj.decode_into()?),
            LocalOciBlobAccess::TYPE => Access::LocalOciBlob(obj.decode_into()?),
            LocalFilesystemBlobAccess::TYPE => Access::LocalFilesystemBlob(obj.decode_into()?),
            RelativeOciAccess::TYPE => Access::RelativeOciReference(obj.decode_into()?),
            _ => Access::Unknown(obj.clone()),
        };
        Ok(access)
    }

    pub fn to_unstructured(&self) -> Result<UnstructuredTypedObject> {
        match self {
            Access::OciRegistry(a) => UnstructuredTypedObject::new(a),
            Access::LocalOciBlob(a) => UnstructuredTypedObject::new(a),
            Access::LocalFilesystemBlob(a) => UnstructuredTypedObject::new(a),
            Access::RelativeOciReference(a) => UnstructuredTypedObject::new(a),
            Access::Unknown(obj) => Ok(obj.clone()),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Access::OciRegistry(_) => OciRegistryAccess::TYPE,
            Access::LocalOciBlob(_) => LocalOciBlobAccess::TYPE,
            Access::LocalFilesystemBlob(_) => LocalFilesystemBlobAccess::TYPE,
            Access::RelativeOciReference(_) => RelativeOciAccess::TYPE,
            Access::Unknown(obj) => obj.object_type(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_view_round_trip() {
        let access = Access::OciRegistry(OciRegistryAccess {
            image_reference: "example.com/image:1.0".into(),
        });
        let obj = access.to_unstructured().unwrap();
        assert_eq!(obj.object_type(), "ociRegistry");
        assert_eq!(obj.raw()["imageReference"], "example.com/image:1.0");
        assert_eq!(Access::from_unstructured(&obj).unwrap(), access);
    }

    #[test]
    fn test_unknown_access_falls_back() {
        let obj = UnstructuredTypedObject::from_bytes(b"type: github\nrepoUrl: x\n").unwrap();
        match Access::from_unstructured(&obj).unwrap() {
            Access::Unknown(inner) => assert_eq!(inner, obj),
            other => panic!("unexpected access {other:?}"),
        }
    }

    #[test]
    fn test_filesystem_blob_media_type_is_optional() {
        let obj = UnstructuredTypedObject::from_bytes(
            b"type: localFilesystemBlob\nfilename: sha256.abc\n",
        )
        .unwrap();
        let access: LocalFilesystemBlobAccess = obj.decode_into().unwrap();
        assert_eq!(access.filename, "sha256.abc");
        assert_eq!(access.media_type, None);
    }
}
