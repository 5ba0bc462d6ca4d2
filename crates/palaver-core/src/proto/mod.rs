//! Wire protocol: message envelopes and the JSON codec
//!
//! Every frame is a single JSON object with exactly one top-level tag. Client
//! frames carry one of `hi|acc|login|sub|leave|pub|get|set|del|note`; server
//! frames one of `ctrl|data|meta|pres|info`. The envelopes are modeled as
//! externally-tagged enums so the one-tag rule is enforced by the codec
//! itself.

pub mod client;
pub mod codec;
pub mod server;

pub use client::{
    AccMessage, ClientMessage, Credential, DelMessage, DelRange, GetMessage, GetQuery, HiMessage,
    LeaveMessage, LoginMessage, MetaGetData, MetaGetDesc, MetaGetSub, NoteMessage, PubMessage,
    SetDesc, SetMessage, SetMeta, SetSub, SubMessage,
};
pub use codec::{decode, encode, is_null, NULL_VALUE};
pub use server::{
    CtrlMessage, DataMessage, Description, InfoMessage, MetaMessage, PresMessage, ServerMessage,
    Subscription,
};
