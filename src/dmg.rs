// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UDIF disk images.
//!
//! A UDIF (`.dmg`) file ends with a 512 byte big-endian `koly` trailer
//! describing the layout of the image. Two of its fields locate the code
//! signature, which sits between the XML property list and the trailer.
//! Embedding a signature means cutting the file at the signature offset,
//! appending the new blob, and appending a trailer with updated
//! signature coordinates.

use {
    crate::{blob::Blob, error::CodesignError, registry},
    byteorder::{ReadBytesExt, WriteBytesExt, BE},
    log::debug,
    std::{
        fs::File,
        io::{Read, Seek, SeekFrom, Write},
    },
};

/// Size in bytes of an encoded [UdifTrailer].
pub const UDIF_TRAILER_SIZE: u64 = 512;

const UDIF_SIGNATURE: [u8; 4] = *b"koly";

/// A fork checksum as embedded in the trailer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdifChecksum {
    pub checksum_type: u32,
    pub size: u32,
    pub data: [u8; 128],
}

impl Default for UdifChecksum {
    fn default() -> Self {
        Self {
            checksum_type: 2,
            size: 32,
            data: [0; 128],
        }
    }
}

impl UdifChecksum {
    fn read_from<R: Read>(r: &mut R) -> Result<Self, CodesignError> {
        let checksum_type = r.read_u32::<BE>()?;
        let size = r.read_u32::<BE>()?;
        let mut data = [0; 128];
        r.read_exact(&mut data)?;

        Ok(Self {
            checksum_type,
            size,
            data,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<(), CodesignError> {
        w.write_u32::<BE>(self.checksum_type)?;
        w.write_u32::<BE>(self.size)?;
        w.write_all(&self.data)?;

        Ok(())
    }
}

/// The `koly` resource file trailer at the end of a UDIF image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdifTrailer {
    // 'koly' signature precedes these fields.
    pub version: u32,
    pub header_size: u32,
    pub flags: u32,
    pub running_data_fork_offset: u64,
    pub data_fork_offset: u64,
    pub data_fork_length: u64,
    pub rsrc_fork_offset: u64,
    pub rsrc_fork_length: u64,
    pub segment_number: u32,
    pub segment_count: u32,
    pub segment_id: [u8; 16],
    pub data_checksum: UdifChecksum,
    pub xml_offset: u64,
    pub xml_length: u64,
    pub reserved1: [u8; 68],
    /// File offset of the embedded code signature; 0 when never signed.
    pub code_sign_offset: u32,
    pub reserved2: [u8; 4],
    /// Length in bytes of the embedded code signature.
    pub code_sign_length: u32,
    pub reserved3: [u8; 40],
    pub master_checksum: UdifChecksum,
    pub image_variant: u32,
    pub sector_count: u64,
    pub reserved4: [u8; 12],
}

impl Default for UdifTrailer {
    fn default() -> Self {
        Self {
            version: 4,
            header_size: UDIF_TRAILER_SIZE as u32,
            flags: 1,
            running_data_fork_offset: 0,
            data_fork_offset: 0,
            data_fork_length: 0,
            rsrc_fork_offset: 0,
            rsrc_fork_length: 0,
            segment_number: 1,
            segment_count: 1,
            segment_id: [0; 16],
            data_checksum: UdifChecksum::default(),
            xml_offset: 0,
            xml_length: 0,
            reserved1: [0; 68],
            code_sign_offset: 0,
            reserved2: [0; 4],
            code_sign_length: 0,
            reserved3: [0; 40],
            master_checksum: UdifChecksum::default(),
            image_variant: 1,
            sector_count: 0,
            reserved4: [0; 12],
        }
    }
}

impl UdifTrailer {
    /// Read the trailer from the final 512 bytes of a seekable stream.
    ///
    /// Returns the trailer and its offset in the stream.
    pub fn read_from<R: Read + Seek>(r: &mut R) -> Result<(Self, u64), CodesignError> {
        let offset = r.seek(SeekFrom::End(-(UDIF_TRAILER_SIZE as i64)))?;

        let mut signature = [0; 4];
        r.read_exact(&mut signature)?;

        if signature != UDIF_SIGNATURE {
            return Err(CodesignError::MagicMismatch {
                context: "UDIF trailer",
                got: u32::from_be_bytes(signature),
                expected: u32::from_be_bytes(UDIF_SIGNATURE),
            });
        }

        let version = r.read_u32::<BE>()?;
        let header_size = r.read_u32::<BE>()?;
        let flags = r.read_u32::<BE>()?;
        let running_data_fork_offset = r.read_u64::<BE>()?;
        let data_fork_offset = r.read_u64::<BE>()?;
        let data_fork_length = r.read_u64::<BE>()?;
        let rsrc_fork_offset = r.read_u64::<BE>()?;
        let rsrc_fork_length = r.read_u64::<BE>()?;
        let segment_number = r.read_u32::<BE>()?;
        let segment_count = r.read_u32::<BE>()?;
        let mut segment_id = [0; 16];
        r.read_exact(&mut segment_id)?;
        let data_checksum = UdifChecksum::read_from(r)?;
        let xml_offset = r.read_u64::<BE>()?;
        let xml_length = r.read_u64::<BE>()?;
        let mut reserved1 = [0; 68];
        r.read_exact(&mut reserved1)?;
        let code_sign_offset = r.read_u32::<BE>()?;
        let mut reserved2 = [0; 4];
        r.read_exact(&mut reserved2)?;
        let code_sign_length = r.read_u32::<BE>()?;
        let mut reserved3 = [0; 40];
        r.read_exact(&mut reserved3)?;
        let master_checksum = UdifChecksum::read_from(r)?;
        let image_variant = r.read_u32::<BE>()?;
        let sector_count = r.read_u64::<BE>()?;
        let mut reserved4 = [0; 12];
        r.read_exact(&mut reserved4)?;

        Ok((
            Self {
                version,
                header_size,
                flags,
                running_data_fork_offset,
                data_fork_offset,
                data_fork_length,
                rsrc_fork_offset,
                rsrc_fork_length,
                segment_number,
                segment_count,
                segment_id,
                data_checksum,
                xml_offset,
                xml_length,
                reserved1,
                code_sign_offset,
                reserved2,
                code_sign_length,
                reserved3,
                master_checksum,
                image_variant,
                sector_count,
                reserved4,
            },
            offset,
        ))
    }

    /// Write the 512 byte trailer to a writer.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), CodesignError> {
        w.write_all(&UDIF_SIGNATURE)?;
        w.write_u32::<BE>(self.version)?;
        w.write_u32::<BE>(self.header_size)?;
        w.write_u32::<BE>(self.flags)?;
        w.write_u64::<BE>(self.running_data_fork_offset)?;
        w.write_u64::<BE>(self.data_fork_offset)?;
        w.write_u64::<BE>(self.data_fork_length)?;
        w.write_u64::<BE>(self.rsrc_fork_offset)?;
        w.write_u64::<BE>(self.rsrc_fork_length)?;
        w.write_u32::<BE>(self.segment_number)?;
        w.write_u32::<BE>(self.segment_count)?;
        w.write_all(&self.segment_id)?;
        self.data_checksum.write_to(w)?;
        w.write_u64::<BE>(self.xml_offset)?;
        w.write_u64::<BE>(self.xml_length)?;
        w.write_all(&self.reserved1)?;
        w.write_u32::<BE>(self.code_sign_offset)?;
        w.write_all(&self.reserved2)?;
        w.write_u32::<BE>(self.code_sign_length)?;
        w.write_all(&self.reserved3)?;
        self.master_checksum.write_to(w)?;
        w.write_u32::<BE>(self.image_variant)?;
        w.write_u64::<BE>(self.sector_count)?;
        w.write_all(&self.reserved4)?;

        Ok(())
    }
}

/// Read and decode the code signature blob embedded in a UDIF image.
pub fn read_blob_from_dmg<T, R>(src: &mut R) -> Result<T, CodesignError>
where
    T: TryFrom<Blob, Error = CodesignError>,
    R: Read + Seek,
{
    let (trailer, _) = UdifTrailer::read_from(src)?;

    debug!(
        "reading {} byte code signature at offset {}",
        trailer.code_sign_length, trailer.code_sign_offset
    );

    src.seek(SeekFrom::Start(trailer.code_sign_offset as u64))?;

    let mut data = vec![0; trailer.code_sign_length as usize];
    src.read_exact(&mut data)?;

    T::try_from(registry::parse_blob(&data)?)
}

/// Embed a code signature blob into a UDIF image, replacing any existing
/// signature and rewriting the trailer.
pub fn write_blob_to_dmg(blob: &Blob, file: &mut File) -> Result<(), CodesignError> {
    let (mut spooled, blob_size) = crate::write_blob_to_temp(blob)?;

    let (mut trailer, trailer_offset) = UdifTrailer::read_from(file)?;

    // A never-signed image has no signature coordinates; the cut point is
    // then the trailer itself.
    let cut = if trailer.code_sign_offset == 0 {
        trailer_offset
    } else {
        trailer.code_sign_offset as u64
    };

    // The trailer stores the signature coordinates in 32 bit fields.
    if cut > u32::MAX as u64 || blob_size > u32::MAX as u64 {
        return Err(CodesignError::SignatureOutOfRange {
            offset: cut,
            length: blob_size,
        });
    }

    debug!("embedding {blob_size} byte code signature at offset {cut}");

    file.set_len(cut)?;
    file.seek(SeekFrom::End(0))?;

    std::io::copy(spooled.as_file_mut(), file)?;

    trailer.code_sign_offset = cut as u32;
    trailer.code_sign_length = blob_size as u32;
    trailer.write_to(file)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{blob::Magic, generic::GenericBlob},
        std::io::Cursor,
    };

    fn fake_image(data_fork: &[u8]) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(data_fork).unwrap();

        let trailer = UdifTrailer {
            data_fork_length: data_fork.len() as u64,
            sector_count: data_fork.len() as u64 / 512,
            ..Default::default()
        };
        trailer.write_to(&mut file).unwrap();

        file
    }

    #[test]
    fn trailer_round_trip() {
        let trailer = UdifTrailer {
            data_fork_length: 0x4000,
            xml_offset: 0x4000,
            xml_length: 0x200,
            code_sign_offset: 0x4200,
            code_sign_length: 0x100,
            segment_id: [7; 16],
            sector_count: 32,
            ..Default::default()
        };

        let mut encoded = Vec::new();
        trailer.write_to(&mut encoded).unwrap();
        assert_eq!(encoded.len() as u64, UDIF_TRAILER_SIZE);
        assert_eq!(&encoded[0..4], b"koly");

        let (decoded, offset) = UdifTrailer::read_from(&mut Cursor::new(&encoded)).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(decoded, trailer);
    }

    #[test]
    fn rejects_missing_signature() {
        let data = vec![0u8; UDIF_TRAILER_SIZE as usize];

        assert!(matches!(
            UdifTrailer::read_from(&mut Cursor::new(&data)),
            Err(CodesignError::MagicMismatch {
                context: "UDIF trailer",
                ..
            })
        ));
    }

    #[test]
    fn embeds_into_unsigned_image() {
        let data_fork = vec![0x5a; 1000];
        let mut file = fake_image(&data_fork);

        let blob = Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"ticket"));
        write_blob_to_dmg(&blob, &mut file).unwrap();

        let (trailer, trailer_offset) = UdifTrailer::read_from(&mut file).unwrap();
        assert_eq!(trailer.code_sign_offset, 1000);
        assert_eq!(trailer.code_sign_length, 14);
        assert_eq!(trailer_offset, 1014);

        // The data fork survives the rewrite.
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut fork = vec![0u8; 1000];
        file.read_exact(&mut fork).unwrap();
        assert_eq!(fork, data_fork);

        let read_back: GenericBlob = read_blob_from_dmg(&mut file).unwrap();
        assert_eq!(read_back.payload(), b"ticket");
    }

    #[test]
    fn rejects_embed_offset_past_32_bits() {
        // Sparse image just past the field limit; only the trailer bytes
        // are actually written.
        let base = u32::MAX as u64 + 1;
        let mut file = tempfile::tempfile().unwrap();
        file.set_len(base).unwrap();
        file.seek(SeekFrom::Start(base)).unwrap();
        UdifTrailer::default().write_to(&mut file).unwrap();

        let blob = Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"x"));
        assert!(matches!(
            write_blob_to_dmg(&blob, &mut file),
            Err(CodesignError::SignatureOutOfRange { .. })
        ));

        // The image is left untouched.
        let length = file.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(length, base + UDIF_TRAILER_SIZE);
    }

    #[test]
    fn replaces_existing_signature() {
        let mut file = fake_image(&[0x5a; 1000]);

        let first = Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, &[0xaa; 100]));
        write_blob_to_dmg(&first, &mut file).unwrap();

        let second = Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"v2"));
        write_blob_to_dmg(&second, &mut file).unwrap();

        let (trailer, _) = UdifTrailer::read_from(&mut file).unwrap();
        assert_eq!(trailer.code_sign_offset, 1000);
        assert_eq!(trailer.code_sign_length, 10);

        // No residue of the first signature remains.
        let length = file.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(length, 1000 + 10 + UDIF_TRAILER_SIZE);

        let read_back: GenericBlob = read_blob_from_dmg(&mut file).unwrap();
        assert_eq!(read_back.payload(), b"v2");
    }
}
