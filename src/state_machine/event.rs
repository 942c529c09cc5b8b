//! Events streamed by the backend during a turn

use super::message::{Stage1Result, Stage2Result, Stage3Result};
use crate::backend::StreamRecord;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Pipeline events, tagged by the record's `type` field
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SearchStart,
    SearchComplete {
        #[serde(default)]
        data: SearchData,
    },

    Stage1Start,
    Stage1Init {
        total: u32,
    },
    Stage1Progress {
        count: u32,
        #[serde(default)]
        total: Option<u32>,
        data: Stage1Result,
    },
    Stage1Complete {
        data: Vec<Stage1Result>,
    },

    Stage2Start,
    Stage2Init {
        total: u32,
    },
    Stage2Progress {
        count: u32,
        #[serde(default)]
        total: Option<u32>,
        data: Stage2Result,
    },
    Stage2Complete {
        data: Vec<Stage2Result>,
        #[serde(default)]
        metadata: Option<Map<String, Value>>,
    },

    Stage3Start,
    Stage3Complete {
        data: Stage3Result,
    },

    TitleComplete {
        #[serde(default)]
        data: Option<TitleData>,
    },
    Complete,
    Error {
        #[serde(default)]
        message: Option<String>,
    },

    /// Any `type` outside the vocabulary above
    #[serde(other)]
    Unknown,
}

/// Payload of `search_complete`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchData {
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub search_context: Option<String>,
}

/// Payload of `title_complete`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TitleData {
    #[serde(default)]
    pub title: Option<String>,
}

impl Event {
    /// Decode a record into a typed event.
    ///
    /// Unknown types decode to [`Event::Unknown`]; a known type whose fields
    /// don't fit is an error and the record should be skipped.
    pub fn from_record(record: &StreamRecord) -> Result<Self, serde_json::Error> {
        Event::deserialize(&record.payload)
    }
}
