//! Outgoing packet construction for each supported protocol.

use crate::calibration::Calibration;
use crate::params::{IpVersion, ProbeParams, Protocol};

/// A fully-built outgoing packet, ready to hand to the matching socket in
/// [`crate::socket_set::SocketSet`].
pub struct ConstructedPacket {
    pub bytes: Vec<u8>,
}

/// Build the wire bytes for one probe. `identifier` is the probe's source
/// port, reused as the ICMP identifier field so correlation is by source
/// port for every protocol including ICMP.
#[must_use]
pub fn construct_packet(
    params: &ProbeParams,
    identifier: u16,
    sequence: u16,
    calibration: &Calibration,
) -> ConstructedPacket {
    match (params.protocol, params.ip_version) {
        (Protocol::Icmp, IpVersion::V4) => {
            construct_icmp4(identifier, sequence, params.ttl, calibration)
        }
        (Protocol::Icmp, IpVersion::V6) => construct_icmp6(identifier, sequence),
        // UDP probes go out through the shared IPv4/IPv6 send sockets (see
        // crate::send's routing table), never a per-probe socket: the only
        // reply channel for UDP is an ICMP error quoting the original
        // packet, so the identifier lives in the UDP header's source port
        // exactly the way it lives in the ICMP identifier field above.
        (Protocol::Udp, IpVersion::V4) => {
            construct_udp4(identifier, sequence, params, calibration)
        }
        (Protocol::Udp, IpVersion::V6) => construct_udp6(identifier, sequence, params),
        (Protocol::Tcp | Protocol::Sctp, _) => ConstructedPacket { bytes: Vec::new() },
    }
}

fn payload_with_sequence(sequence: u16) -> Vec<u8> {
    sequence.to_be_bytes().to_vec()
}

/// Build a UDP header (source port/dest port/length/checksum) over a small
/// sequence-carrying payload.
fn build_udp_header(source_port: u16, dest_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp_len = (8 + payload.len()) as u16;
    let mut udp = vec![0u8; 8];
    udp[0..2].copy_from_slice(&source_port.to_be_bytes());
    udp[2..4].copy_from_slice(&dest_port.to_be_bytes());
    udp[4..6].copy_from_slice(&udp_len.to_be_bytes());
    // Checksum left at 0 here; see each caller for why that's valid for its
    // IP version.
    udp[6..8].copy_from_slice(&0u16.to_be_bytes());
    udp.extend_from_slice(payload);
    udp
}

fn construct_udp4(
    source_port: u16,
    sequence: u16,
    params: &ProbeParams,
    calibration: &Calibration,
) -> ConstructedPacket {
    // A zero UDP checksum is a legal "no checksum computed" marker for IPv4
    // (RFC 768), so there's no need to know the (kernel-filled) source
    // address to compute one.
    let udp = build_udp_header(
        source_port,
        params.dest_port.unwrap_or(0),
        &payload_with_sequence(sequence),
    );
    let total_len = (20 + udp.len()) as u16;

    let mut packet = vec![0u8; total_len as usize];
    packet[0] = 0x45;
    packet[1] = 0;
    calibration.encode_ip_total_len(&mut packet[2..4], total_len);
    packet[4..6].copy_from_slice(&0u16.to_be_bytes());
    packet[6..8].copy_from_slice(&0u16.to_be_bytes());
    packet[8] = params.ttl;
    packet[9] = 17; // UDP
    packet[10..12].copy_from_slice(&0u16.to_be_bytes());
    packet[20..].copy_from_slice(&udp);

    ConstructedPacket { bytes: packet }
}

fn construct_udp6(source_port: u16, sequence: u16, params: &ProbeParams) -> ConstructedPacket {
    // IPv6 has no IP_HDRINCL equivalent on SocketSet::udp6_send, so only the
    // UDP header and payload are ours to build; the kernel supplies the
    // IPv6 header. Unlike IPv4, IPv6 UDP checksums are mandatory (RFC 8200)
    // and can't be computed here without the kernel-assigned source address,
    // so the checksum field is left at 0 and IPV6_CHECKSUM (set once on
    // udp6_send in SocketSet::open_privileged) tells the kernel to compute
    // and overwrite it in place before transmission.
    ConstructedPacket {
        bytes: build_udp_header(
            source_port,
            params.dest_port.unwrap_or(0),
            &payload_with_sequence(sequence),
        ),
    }
}

fn construct_icmp4(id: u16, seq: u16, ttl: u8, calibration: &Calibration) -> ConstructedPacket {
    let icmp = build_icmp_echo(8, id, seq);
    let total_len = (20 + icmp.len()) as u16;

    let mut packet = vec![0u8; total_len as usize];
    packet[0] = 0x45;
    packet[1] = 0;
    calibration.encode_ip_total_len(&mut packet[2..4], total_len);
    packet[4..6].copy_from_slice(&0u16.to_be_bytes());
    packet[6..8].copy_from_slice(&0u16.to_be_bytes());
    packet[8] = ttl;
    packet[9] = 1; // ICMP
    packet[10..12].copy_from_slice(&0u16.to_be_bytes());
    // Source/destination address left zeroed: IP_HDRINCL sockets still let
    // the kernel fill in the source address, and sendto's destination
    // argument governs routing regardless of what's in this field.
    packet[20..].copy_from_slice(&icmp);

    ConstructedPacket { bytes: packet }
}

fn construct_icmp6(id: u16, seq: u16) -> ConstructedPacket {
    // The kernel computes the ICMPv6 checksum (it must, since the checksum
    // covers the IPv6 pseudo-header this crate never builds), so code 0 and
    // a zeroed checksum field are sent as-is.
    ConstructedPacket {
        bytes: build_icmp_echo(128, id, seq),
    }
}

fn build_icmp_echo(icmp_type: u8, id: u16, seq: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 8];
    packet[0] = icmp_type;
    packet[1] = 0;
    packet[2] = 0;
    packet[3] = 0;
    packet[4..6].copy_from_slice(&id.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());

    if icmp_type == 8 {
        // ICMPv4 checksum is ours to compute; ICMPv6's covers a
        // pseudo-header only the kernel knows, so it's left at 0 for type
        // 128 and filled in by the stack.
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

/// Internet checksum (RFC 1071), one's complement of the one's-complement
/// sum of 16-bit words.
fn icmp_checksum(packet: &[u8]) -> u16 {
    let mut sum = 0u32;
    for chunk in packet.chunks(2) {
        if chunk.len() == 2 {
            sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        } else {
            sum += (chunk[0] as u32) << 8;
        }
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icmp4_checksum_is_nonzero_for_nonzero_input() {
        let echo = build_icmp_echo(8, 0x1234, 7);
        let checksum = u16::from_be_bytes([echo[2], echo[3]]);
        assert_ne!(checksum, 0);
    }

    #[test]
    fn icmp6_checksum_left_for_kernel() {
        let echo = build_icmp_echo(128, 0x1234, 7);
        assert_eq!(echo[2], 0);
        assert_eq!(echo[3], 0);
    }

    #[test]
    fn checksum_of_all_zero_packet_is_all_ones() {
        let packet = vec![0u8; 8];
        assert_eq!(icmp_checksum(&packet), 0xffff);
    }

    #[test]
    fn icmp4_packet_has_correct_total_length_field() {
        let calibration = Calibration {
            ip_length_host_order: false,
            sctp_support: false,
        };
        let built = construct_icmp4(1, 1, 64, &calibration);
        let len = u16::from_be_bytes([built.bytes[2], built.bytes[3]]);
        assert_eq!(len as usize, built.bytes.len());
    }

    fn udp_params() -> ProbeParams {
        use crate::params::{IpVersion, Protocol};
        ProbeParams {
            protocol: Protocol::Udp,
            ip_version: IpVersion::V4,
            ttl: 64,
            address: "203.0.113.1".to_string(),
            dest_port: Some(33434),
            timeout: std::time::Duration::from_secs(1),
            command_token: 1,
            payload_size: None,
        }
    }

    #[test]
    fn udp4_packet_embeds_source_port_and_dest_port() {
        let calibration = Calibration {
            ip_length_host_order: false,
            sctp_support: false,
        };
        let built = construct_udp4(0x4321, 1, &udp_params(), &calibration);
        // 20-byte IP header + 8-byte UDP header.
        let udp = &built.bytes[20..];
        assert_eq!(u16::from_be_bytes([udp[0], udp[1]]), 0x4321);
        assert_eq!(u16::from_be_bytes([udp[2], udp[3]]), 33434);
        assert_eq!(built.bytes[9], 17); // IP protocol field: UDP
    }

    #[test]
    fn udp6_packet_has_no_ip_header_and_zero_checksum() {
        let built = construct_udp6(0x1122, 1, &udp_params());
        assert_eq!(u16::from_be_bytes([built.bytes[0], built.bytes[1]]), 0x1122);
        assert_eq!(built.bytes[6], 0);
        assert_eq!(built.bytes[7], 0);
    }
}
