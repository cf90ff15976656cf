//! Record layout.
//!
//! A [`Record`] knows how to turn its logical input into one fixed-size
//! slot and how to rebuild itself from a slot. The store never looks
//! inside a slot.

use std::fmt;

use fortuna_core::{Error, Result};

use crate::slot::{get_u64, InlineStr};

/// An entity with a fixed-size on-disk slot.
pub trait Record: Sized {
    /// Bytes per slot. Every record of the type occupies exactly this much.
    const SLOT_SIZE: usize;

    /// Borrowed logical form handed to `RecordStore::write`.
    type Input<'a>;

    /// Serialize `input` under `id` into `slot` (`SLOT_SIZE` bytes).
    /// Must fail with `Validation` before touching `slot` when the input
    /// does not fit.
    fn encode(id: u64, input: &Self::Input<'_>, slot: &mut [u8]) -> Result<()>;

    /// Rebuild a record from a slot.
    fn decode(slot: &[u8]) -> Result<Self>;

    fn id(&self) -> u64;
}

/// Capacity of a fortune's message area.
pub const MESSAGE_CAPACITY: usize = 128;

const ID_AT: usize = 0;
const SPAN_AT: usize = 8;
const DATA_AT: usize = SPAN_AT + InlineStr::ENCODED_LEN;

/// A short message, stored inline in its own slot.
///
/// The message is never copied out: [`Fortune::message`] is a view into the
/// record's own data area.
#[derive(Clone)]
pub struct Fortune {
    id: u64,
    message: InlineStr,
    data: [u8; MESSAGE_CAPACITY],
}

impl Default for Fortune {
    fn default() -> Self {
        Self {
            id: 0,
            message: InlineStr::default(),
            data: [0u8; MESSAGE_CAPACITY],
        }
    }
}

impl Fortune {
    /// Build an in-memory fortune. Fails with `Validation` when `message`
    /// exceeds [`MESSAGE_CAPACITY`].
    pub fn new(id: u64, message: &str) -> Result<Self> {
        let mut data = [0u8; MESSAGE_CAPACITY];
        let message = InlineStr::store(message.as_bytes(), &mut data, 0)?;
        Ok(Self { id, message, data })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Message bytes, borrowed from the record's own data area.
    #[inline]
    pub fn message_bytes(&self) -> &[u8] {
        self.message.view(&self.data).unwrap_or(&[])
    }

    /// Message text. Spans are validated as UTF-8 on construction and decode.
    #[inline]
    pub fn message(&self) -> &str {
        std::str::from_utf8(self.message_bytes()).unwrap_or("")
    }
}

impl fmt::Debug for Fortune {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fortune")
            .field("id", &self.id)
            .field("message", &self.message())
            .finish()
    }
}

impl PartialEq for Fortune {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.message_bytes() == other.message_bytes()
    }
}

impl Eq for Fortune {}

impl Record for Fortune {
    const SLOT_SIZE: usize = DATA_AT + MESSAGE_CAPACITY;

    type Input<'a> = &'a str;

    fn encode(id: u64, input: &&str, slot: &mut [u8]) -> Result<()> {
        if input.len() > MESSAGE_CAPACITY {
            return Err(Error::Validation(format!(
                "message is {} bytes, slot holds {}",
                input.len(),
                MESSAGE_CAPACITY
            )));
        }
        slot.fill(0);
        slot[ID_AT..SPAN_AT].copy_from_slice(&id.to_le_bytes());
        let span = InlineStr::store(input.as_bytes(), &mut slot[DATA_AT..], 0)?;
        span.encode(&mut slot[SPAN_AT..DATA_AT]);
        Ok(())
    }

    fn decode(slot: &[u8]) -> Result<Self> {
        if slot.len() < Self::SLOT_SIZE {
            return Err(Error::Corrupt(format!(
                "slot is {} bytes, expected {}",
                slot.len(),
                Self::SLOT_SIZE
            )));
        }
        let mut fortune = Fortune {
            id: get_u64(&slot[ID_AT..SPAN_AT]),
            message: InlineStr::decode(&slot[SPAN_AT..DATA_AT]),
            data: [0u8; MESSAGE_CAPACITY],
        };
        fortune.data.copy_from_slice(&slot[DATA_AT..Self::SLOT_SIZE]);

        let text = fortune.message.view(&fortune.data)?;
        if std::str::from_utf8(text).is_err() {
            return Err(Error::Corrupt(format!(
                "fortune {} message is not UTF-8",
                fortune.id
            )));
        }
        Ok(fortune)
    }

    fn id(&self) -> u64 {
        self.id
    }
}
