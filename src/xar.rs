// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notarization ticket stapling for XAR flat packages.
//!
//! A stapled `.pkg` carries its notarization ticket after the regular XAR
//! content, framed by little-endian `t8lr` trailers: a terminator trailer,
//! then the raw ticket bytes, then a ticket trailer whose length field
//! records the ticket size. Readers scan backwards from the end of the
//! file, so stapling is a pure append.

use {
    crate::error::CodesignError,
    byteorder::{ReadBytesExt, WriteBytesExt, LE},
    log::info,
    std::{
        fs::OpenOptions,
        io::{Cursor, Read, Write},
        path::Path,
    },
};

/// Size in bytes of an encoded [XarTrailer].
pub const XAR_TRAILER_SIZE: usize = 16;

const XAR_TRAILER_MAGIC: [u8; 4] = *b"t8lr";

/// Content type of a XAR trailer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XarTrailerType {
    Invalid,
    Terminator,
    Ticket,
}

impl From<XarTrailerType> for u16 {
    fn from(v: XarTrailerType) -> Self {
        match v {
            XarTrailerType::Invalid => 0,
            XarTrailerType::Terminator => 1,
            XarTrailerType::Ticket => 2,
        }
    }
}

impl TryFrom<u16> for XarTrailerType {
    type Error = CodesignError;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Invalid),
            1 => Ok(Self::Terminator),
            2 => Ok(Self::Ticket),
            _ => Err(CodesignError::UnsupportedContainer("xar trailer type")),
        }
    }
}

/// The 16 byte little-endian trailer framing stapled content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct XarTrailer {
    pub version: u16,
    pub trailer_type: XarTrailerType,
    /// Size in bytes of the framed content preceding this trailer.
    pub length: u32,
}

impl XarTrailer {
    pub fn new(trailer_type: XarTrailerType, length: u32) -> Self {
        Self {
            version: 1,
            trailer_type,
            length,
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, CodesignError> {
        let mut magic = [0; 4];
        r.read_exact(&mut magic)?;

        if magic != XAR_TRAILER_MAGIC {
            return Err(CodesignError::MagicMismatch {
                context: "xar trailer",
                got: u32::from_be_bytes(magic),
                expected: u32::from_be_bytes(XAR_TRAILER_MAGIC),
            });
        }

        let version = r.read_u16::<LE>()?;
        let trailer_type = XarTrailerType::try_from(r.read_u16::<LE>()?)?;
        let length = r.read_u32::<LE>()?;
        let _reserved = r.read_u32::<LE>()?;

        Ok(Self {
            version,
            trailer_type,
            length,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), CodesignError> {
        w.write_all(&XAR_TRAILER_MAGIC)?;
        w.write_u16::<LE>(self.version)?;
        w.write_u16::<LE>(u16::from(self.trailer_type))?;
        w.write_u32::<LE>(self.length)?;
        w.write_u32::<LE>(0)?;

        Ok(())
    }
}

/// Frame a notarization ticket for appending to a flat package.
///
/// The result is a terminator trailer, the ticket bytes, and a ticket
/// trailer recording the ticket size.
pub fn package_ticket_trailer(ticket: &[u8]) -> Result<Vec<u8>, CodesignError> {
    let mut cursor = Cursor::new(Vec::with_capacity(ticket.len() + 2 * XAR_TRAILER_SIZE));

    XarTrailer::new(XarTrailerType::Terminator, 0).write_to(&mut cursor)?;
    cursor.write_all(ticket)?;
    XarTrailer::new(XarTrailerType::Ticket, ticket.len() as u32).write_to(&mut cursor)?;

    Ok(cursor.into_inner())
}

/// Staple a notarization ticket to a flat package by appending the framed
/// ticket to the file.
pub fn staple_ticket_to_pkg(path: impl AsRef<Path>, ticket: &[u8]) -> Result<(), CodesignError> {
    let path = path.as_ref();

    info!(
        "stapling {} byte ticket to {}",
        ticket.len(),
        path.display()
    );

    let framed = package_ticket_trailer(ticket)?;

    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(&framed)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailer_encoding() {
        let mut encoded = Vec::new();
        XarTrailer::new(XarTrailerType::Ticket, 0x1234)
            .write_to(&mut encoded)
            .unwrap();

        assert_eq!(
            encoded,
            [
                b't', b'8', b'l', b'r', // magic
                0x01, 0x00, // version
                0x02, 0x00, // type
                0x34, 0x12, 0x00, 0x00, // length
                0x00, 0x00, 0x00, 0x00, // reserved
            ]
        );

        let decoded = XarTrailer::read_from(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, XarTrailer::new(XarTrailerType::Ticket, 0x1234));
    }

    #[test]
    fn rejects_bad_magic() {
        let data = [0u8; XAR_TRAILER_SIZE];

        assert!(matches!(
            XarTrailer::read_from(&mut data.as_slice()),
            Err(CodesignError::MagicMismatch {
                context: "xar trailer",
                ..
            })
        ));
    }

    #[test]
    fn frames_ticket_between_trailers() {
        let framed = package_ticket_trailer(b"ticket-data").unwrap();
        assert_eq!(framed.len(), 11 + 2 * XAR_TRAILER_SIZE);

        let terminator = XarTrailer::read_from(&mut &framed[0..]).unwrap();
        assert_eq!(terminator, XarTrailer::new(XarTrailerType::Terminator, 0));

        assert_eq!(&framed[XAR_TRAILER_SIZE..XAR_TRAILER_SIZE + 11], b"ticket-data");

        let ticket = XarTrailer::read_from(&mut &framed[XAR_TRAILER_SIZE + 11..]).unwrap();
        assert_eq!(ticket, XarTrailer::new(XarTrailerType::Ticket, 11));
    }

    #[test]
    fn staple_appends_to_package() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"xar!content").unwrap();

        staple_ticket_to_pkg(file.path(), b"tkt").unwrap();

        let data = std::fs::read(file.path()).unwrap();
        assert_eq!(&data[0..11], b"xar!content");
        assert_eq!(data.len(), 11 + 3 + 2 * XAR_TRAILER_SIZE);
        assert_eq!(&data[11..15], b"t8lr");
        assert_eq!(&data[11 + XAR_TRAILER_SIZE..11 + XAR_TRAILER_SIZE + 3], b"tkt");
    }
}
