//! Packet construction and parsing: building outgoing probe packets for
//! each protocol, and recovering the correlation key and outcome from an
//! incoming ICMP/ICMPv6 reply, including error-quotation parsing.

mod construct;
mod decode;

pub use construct::{construct_packet, ConstructedPacket};
pub use decode::{decode_ip4_reply, decode_icmp6_reply, DecodedReply, ReplyKind};
