#![forbid(unsafe_code)]

//! Wire codec for the netlink connector cn_proc protocol.
//!
//! The kernel multicasts process lifecycle events to userspace as netlink
//! datagrams: an nlmsghdr wrapping a connector header (cn_msg) wrapping the
//! event payload. All multi-byte fields are in native byte order; the
//! protocol never leaves the machine. This module is the only place that
//! parses bytes originating outside the process, so every accessor here is
//! bounds-checked and total over arbitrary input.

use crate::Pid;

/// Connector index of the process-events source.
pub const CN_IDX_PROC: u32 = 0x1;
/// Connector value of the process-events source.
pub const CN_VAL_PROC: u32 = 0x1;
/// Event tag for exec notifications.
pub const PROC_EVENT_EXEC: u32 = 0x0000_0002;
/// Operation code: start multicasting proc events to our group.
pub const PROC_CN_MCAST_LISTEN: u32 = 1;
/// Operation code: stop multicasting.
pub const PROC_CN_MCAST_IGNORE: u32 = 2;

/// struct nlmsghdr: len(u32) type(u16) flags(u16) seq(u32) pid(u32).
pub const NLMSG_HEADER_SIZE: usize = 16;
/// struct cn_msg: idx(u32) val(u32) seq(u32) ack(u32) len(u16) flags(u16).
pub const CN_MSG_HEADER_SIZE: usize = 20;
/// struct proc_event through the exec payload:
/// what(u32) cpu(u32) timestamp(u64) process_pid(u32) process_tgid(u32).
pub const PROC_EVENT_MIN_SIZE: usize = 24;

/// Total length of an outbound subscribe frame.
pub const SUBSCRIBE_FRAME_SIZE: usize = NLMSG_HEADER_SIZE + CN_MSG_HEADER_SIZE + 4;

const NLMSG_DONE: u16 = 0x3;
const NLMSG_ALIGN: usize = 4;

const WHAT_OFFSET: usize = CN_MSG_HEADER_SIZE;
const EXEC_PID_OFFSET: usize = CN_MSG_HEADER_SIZE + 16;

/// Encode a connector subscribe/unsubscribe control frame.
///
/// Layout is nlmsghdr + cn_msg + a 4-byte op, 40 bytes total, native byte
/// order. `sender_pid` goes into the nlmsghdr pid field so the kernel can
/// route the ack; `op` is [`PROC_CN_MCAST_LISTEN`] or
/// [`PROC_CN_MCAST_IGNORE`].
pub fn encode_subscribe(op: u32, sender_pid: u32) -> [u8; SUBSCRIBE_FRAME_SIZE] {
    let mut frame = [0u8; SUBSCRIBE_FRAME_SIZE];
    let mut at = 0;

    let mut put = |bytes: &[u8]| {
        frame[at..at + bytes.len()].copy_from_slice(bytes);
        at += bytes.len();
    };

    // nlmsghdr
    put(&(SUBSCRIBE_FRAME_SIZE as u32).to_ne_bytes());
    put(&NLMSG_DONE.to_ne_bytes());
    put(&0u16.to_ne_bytes()); // flags
    put(&0u32.to_ne_bytes()); // seq
    put(&sender_pid.to_ne_bytes());

    // cn_msg
    put(&CN_IDX_PROC.to_ne_bytes());
    put(&CN_VAL_PROC.to_ne_bytes());
    put(&0u32.to_ne_bytes()); // seq
    put(&0u32.to_ne_bytes()); // ack
    put(&4u16.to_ne_bytes()); // payload length: sizeof(op)
    put(&0u16.to_ne_bytes()); // flags

    put(&op.to_ne_bytes());

    frame
}

/// Extract the exec'd pid from one connector message payload (the bytes
/// after the nlmsghdr).
///
/// Fails closed: returns `None` on truncated input, on a connector source
/// other than cn_proc, and on any event tag other than exec. Never reads
/// past the end of `data`.
pub fn decode_exec_event(data: &[u8]) -> Option<Pid> {
    if data.len() < CN_MSG_HEADER_SIZE + PROC_EVENT_MIN_SIZE {
        return None;
    }
    if read_u32(data, 0)? != CN_IDX_PROC || read_u32(data, 4)? != CN_VAL_PROC {
        return None;
    }
    if read_u32(data, WHAT_OFFSET)? != PROC_EVENT_EXEC {
        return None;
    }
    Some(read_u32(data, EXEC_PID_OFFSET)? as Pid)
}

/// Split one received datagram into netlink message payloads.
///
/// The kernel may concatenate several messages into a single read; each is
/// delimited by the length field of its nlmsghdr, padded to 4-byte
/// alignment. Truncated or nonsensical headers end the walk rather than
/// erroring: the remainder of a damaged datagram is unrecoverable anyway.
pub fn split_messages(datagram: &[u8]) -> Vec<&[u8]> {
    let mut payloads = Vec::new();
    let mut rest = datagram;

    while rest.len() >= NLMSG_HEADER_SIZE {
        let Some(len) = read_u32(rest, 0) else { break };
        let len = len as usize;
        if len < NLMSG_HEADER_SIZE || len > rest.len() {
            break;
        }
        payloads.push(&rest[NLMSG_HEADER_SIZE..len]);
        let advance = len.div_ceil(NLMSG_ALIGN) * NLMSG_ALIGN;
        if advance >= rest.len() {
            break;
        }
        rest = &rest[advance..];
    }

    payloads
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_ne_bytes(bytes.try_into().ok()?))
}
