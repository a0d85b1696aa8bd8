use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::descriptor::Descriptor;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`Face`] record.
    FaceId
);
id_type!(
    /// Identifier of a [`Person`] cluster.
    PersonId
);

/// Opaque reference to the media item a face was detected in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(pub String);

impl MediaRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Face bounding box in source-media pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One face as reported by the external detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Raw, not yet normalized descriptor.
    pub descriptor: Descriptor,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Reference to a cropped preview of the face, if one was produced.
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// A detected face. `person_id == None` means unassigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub id: FaceId,
    pub media: MediaRef,
    pub descriptor: Descriptor,
    pub bbox: BoundingBox,
    pub person_id: Option<PersonId>,
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Face {
    pub fn new(media: MediaRef, descriptor: Descriptor, bbox: BoundingBox) -> Self {
        Self {
            id: FaceId::new(),
            media,
            descriptor,
            bbox,
            person_id: None,
            thumbnail: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    pub fn assigned_to(mut self, person_id: PersonId) -> Self {
        self.person_id = Some(person_id);
        self
    }

    pub fn is_assigned(&self) -> bool {
        self.person_id.is_some()
    }
}

/// An identity cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    /// Mean of the descriptors of every face owned by this person.
    pub representative: Descriptor,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Person {
    /// The only way to create a person: seeded with the descriptor of the
    /// face that triggered its creation.
    pub fn seeded(descriptor: Descriptor) -> Self {
        Self {
            id: PersonId::new(),
            representative: descriptor,
            name: None,
            created_at: Utc::now(),
        }
    }
}

/// Gallery view of one person.
#[derive(Debug, Clone, Serialize)]
pub struct PersonSummary {
    pub person_id: PersonId,
    pub name: Option<String>,
    pub face_count: usize,
    pub sample_thumbnail: Option<String>,
    /// Distinct media items this person appears in, in first-seen order.
    pub media: Vec<MediaRef>,
}
