//! Module API messages.
//!
//! Every frame is `size:u16 | type:u16 | body`, big-endian, where `size`
//! counts the whole frame including its header.

use crate::error::{WireError, WireResult};
use bytes::{BufMut, Bytes, BytesMut};

/// Module announces data to the network.
pub const GOSSIP_ANNOUNCE: u16 = 500;
/// Module subscribes to a gossip type.
pub const GOSSIP_NOTIFY: u16 = 501;
/// Node delivers received data to a module.
pub const GOSSIP_NOTIFICATION: u16 = 502;
/// Module judges received data.
pub const GOSSIP_VALIDATION: u16 = 503;

/// Size of the frame header.
pub const HEADER_SIZE: usize = 4;

/// A framed message whose body has not been interpreted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFrame {
    /// Message type code.
    pub msg_type: u16,
    /// Body following the header.
    pub body: Bytes,
}

/// Any module API message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiMessage {
    /// `ttl:u8 | reserved:u8 | data_type:u16 | data`
    Announce {
        /// Hop budget.
        ttl: u8,
        /// Gossip type.
        data_type: u16,
        /// Payload.
        payload: Vec<u8>,
    },
    /// `reserved:u16 | data_type:u16`
    Notify {
        /// Gossip type.
        data_type: u16,
    },
    /// `message_id:u16 | data_type:u16 | data`
    Notification {
        /// Local message id.
        message_id: u16,
        /// Gossip type.
        data_type: u16,
        /// Payload.
        payload: Vec<u8>,
    },
    /// `message_id:u16 | reserved:15 bits | valid:1 bit`
    Validation {
        /// Local message id.
        message_id: u16,
        /// Verdict.
        valid: bool,
    },
}

fn read_u16(body: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([body[at], body[at + 1]])
}

fn require(body: &[u8], needed: usize) -> WireResult<()> {
    if body.len() < needed {
        return Err(WireError::NotEnoughData {
            needed,
            available: body.len(),
        });
    }
    Ok(())
}

impl ApiMessage {
    /// Returns the type code.
    #[must_use]
    pub const fn msg_type(&self) -> u16 {
        match self {
            Self::Announce { .. } => GOSSIP_ANNOUNCE,
            Self::Notify { .. } => GOSSIP_NOTIFY,
            Self::Notification { .. } => GOSSIP_NOTIFICATION,
            Self::Validation { .. } => GOSSIP_VALIDATION,
        }
    }

    /// Interprets a frame body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::WrongMessageType`] for unknown codes and
    /// [`WireError::NotEnoughData`] for truncated bodies.
    pub fn parse(frame: &ApiFrame) -> WireResult<Self> {
        let body = frame.body.as_ref();
        match frame.msg_type {
            GOSSIP_ANNOUNCE => {
                require(body, 4)?;
                Ok(Self::Announce {
                    ttl: body[0],
                    data_type: read_u16(body, 2),
                    payload: body[4..].to_vec(),
                })
            }
            GOSSIP_NOTIFY => {
                require(body, 4)?;
                Ok(Self::Notify {
                    data_type: read_u16(body, 2),
                })
            }
            GOSSIP_NOTIFICATION => {
                require(body, 4)?;
                Ok(Self::Notification {
                    message_id: read_u16(body, 0),
                    data_type: read_u16(body, 2),
                    payload: body[4..].to_vec(),
                })
            }
            GOSSIP_VALIDATION => {
                require(body, 4)?;
                Ok(Self::Validation {
                    message_id: read_u16(body, 0),
                    valid: read_u16(body, 2) & 1 == 1,
                })
            }
            other => Err(WireError::WrongMessageType(other)),
        }
    }

    /// Length of the whole encoded frame, header included.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.body_len()
    }

    /// Returns the frame size header, if the message fits a frame.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MessageTooLarge`] if the frame exceeds `u16::MAX` bytes.
    pub fn frame_size(&self) -> WireResult<u16> {
        let frame_len = self.frame_len();
        u16::try_from(frame_len).map_err(|_| WireError::MessageTooLarge(frame_len))
    }

    /// Length of the encoded body.
    #[must_use]
    pub fn body_len(&self) -> usize {
        match self {
            Self::Announce { payload, .. } | Self::Notification { payload, .. } => 4 + payload.len(),
            Self::Notify { .. } | Self::Validation { .. } => 4,
        }
    }

    /// Writes the body (without header) into `dst`.
    pub fn write_body(&self, dst: &mut BytesMut) {
        match self {
            Self::Announce {
                ttl,
                data_type,
                payload,
            } => {
                dst.put_u8(*ttl);
                dst.put_u8(0);
                dst.put_u16(*data_type);
                dst.put_slice(payload);
            }
            Self::Notify { data_type } => {
                dst.put_u16(0);
                dst.put_u16(*data_type);
            }
            Self::Notification {
                message_id,
                data_type,
                payload,
            } => {
                dst.put_u16(*message_id);
                dst.put_u16(*data_type);
                dst.put_slice(payload);
            }
            Self::Validation { message_id, valid } => {
                dst.put_u16(*message_id);
                dst.put_u16(u16::from(*valid));
            }
        }
    }
}

/// Messages a module may send to the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromModule {
    /// Disseminate data.
    Announce {
        /// Hop budget.
        ttl: u8,
        /// Gossip type.
        data_type: u16,
        /// Payload.
        payload: Vec<u8>,
    },
    /// Subscribe to a gossip type.
    Notify {
        /// Gossip type.
        data_type: u16,
    },
    /// Judge a notification.
    Validation {
        /// Local message id.
        message_id: u16,
        /// Verdict.
        valid: bool,
    },
}

/// Messages the node sends to a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToModule {
    /// Data received from the network.
    Notification {
        /// Local message id to quote in the validation.
        message_id: u16,
        /// Gossip type.
        data_type: u16,
        /// Payload.
        payload: Vec<u8>,
    },
}

impl ToModule {
    /// Returns the frame size header, if the message fits a frame.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MessageTooLarge`] if the frame exceeds `u16::MAX` bytes.
    pub fn frame_size(&self) -> WireResult<u16> {
        let frame_len = match self {
            Self::Notification { payload, .. } => HEADER_SIZE + 4 + payload.len(),
        };
        u16::try_from(frame_len).map_err(|_| WireError::MessageTooLarge(frame_len))
    }
}

impl TryFrom<ApiMessage> for FromModule {
    type Error = WireError;

    fn try_from(message: ApiMessage) -> WireResult<Self> {
        match message {
            ApiMessage::Announce {
                ttl,
                data_type,
                payload,
            } => Ok(Self::Announce {
                ttl,
                data_type,
                payload,
            }),
            ApiMessage::Notify { data_type } => Ok(Self::Notify { data_type }),
            ApiMessage::Validation { message_id, valid } => {
                Ok(Self::Validation { message_id, valid })
            }
            other @ ApiMessage::Notification { .. } => {
                Err(WireError::WrongMessageType(other.msg_type()))
            }
        }
    }
}

impl TryFrom<ApiMessage> for ToModule {
    type Error = WireError;

    fn try_from(message: ApiMessage) -> WireResult<Self> {
        match message {
            ApiMessage::Notification {
                message_id,
                data_type,
                payload,
            } => Ok(Self::Notification {
                message_id,
                data_type,
                payload,
            }),
            other => Err(WireError::WrongMessageType(other.msg_type())),
        }
    }
}

impl From<FromModule> for ApiMessage {
    fn from(message: FromModule) -> Self {
        match message {
            FromModule::Announce {
                ttl,
                data_type,
                payload,
            } => Self::Announce {
                ttl,
                data_type,
                payload,
            },
            FromModule::Notify { data_type } => Self::Notify { data_type },
            FromModule::Validation { message_id, valid } => {
                Self::Validation { message_id, valid }
            }
        }
    }
}

impl From<ToModule> for ApiMessage {
    fn from(message: ToModule) -> Self {
        match message {
            ToModule::Notification {
                message_id,
                data_type,
                payload,
            } => Self::Notification {
                message_id,
                data_type,
                payload,
            },
        }
    }
}
