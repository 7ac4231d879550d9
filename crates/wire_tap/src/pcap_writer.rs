// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Writing captured frames to a pcapng file, keeping the nanosecond
//! timestamps the NIC gave us.

use std::{fmt, io};

use pcap_parser::{
    EnhancedPacketBlock, InterfaceDescriptionBlock, Linktype, OptionCode, PcapNGOption,
    SectionHeaderBlock, ToVec,
};

use crate::Nanos;

/// `if_name`, pcapng section 4.2.
const IF_NAME: OptionCode = OptionCode(2);

pub struct PcapWriter<W: io::Write> {
    writer: W,
}

fn to_io(e: impl fmt::Debug) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}"))
}

impl<W: io::Write> PcapWriter<W> {
    /// Writes the section header and the description of the one interface
    /// every packet in this file comes from.
    pub fn new(mut writer: W, if_name: &str) -> Result<Self, io::Error> {
        let mut shb = SectionHeaderBlock {
            block_type: 0,
            block_len1: 0,
            bom: 0,
            major_version: 0,
            minor_version: 0,
            section_len: -1i64,
            // for "lol" reasons the lack of endofopt in this block is not
            // fixed up.
            options: vec![PcapNGOption {
                code: OptionCode::EndOfOpt,
                len: 0,
                value: &[],
            }],
            block_len2: 0,
        };
        writer.write_all(&shb.to_vec().map_err(to_io)?)?;

        let tsresol = 9u8;
        let tsresol_enc = (tsresol as u32).to_le_bytes();
        let mut idb = InterfaceDescriptionBlock {
            block_type: 0,
            block_len1: 0,
            block_len2: 0,
            linktype: Linktype::ETHERNET,
            reserved: 0,
            snaplen: 262144,
            options: vec![
                PcapNGOption {
                    code: IF_NAME,
                    len: if_name.len() as u16,
                    value: if_name.as_bytes(),
                },
                PcapNGOption {
                    code: OptionCode::IfTsresol,
                    len: 1,
                    value: &tsresol_enc,
                },
            ],
            // nanosecond resolution
            if_tsresol: tsresol,
            if_tsoffset: 0,
        };
        writer.write_all(&idb.to_vec().map_err(to_io)?)?;

        Ok(PcapWriter { writer })
    }

    pub fn on_packet(&mut self, time: Nanos, data: &[u8]) -> Result<(), io::Error> {
        let (ts_high, ts_low) = ((time >> 32) & 0xffff_ffff, time & 0xffff_ffff);

        let mut epb = EnhancedPacketBlock {
            block_type: 0,
            block_len1: 0,
            block_len2: 0,
            if_id: 0,
            ts_high: ts_high as u32,
            ts_low: ts_low as u32,
            caplen: data.len() as u32,
            origlen: data.len() as u32,
            data,
            options: Vec::new(),
        };

        self.writer.write_all(&epb.to_vec().map_err(to_io)?)
    }

    pub fn flush(&mut self) -> Result<(), io::Error> {
        self.writer.flush()
    }
}
