use super::header::FIXED_HEADER_SIZE;
use super::{PacketError, PacketView};

/// Profile tag and length word preceding the extension elements.
pub const EXTENSION_HEADER_SIZE: usize = 4;

/// Audio level reported for a CSRC the peer sent no level for (-127 dBov).
pub const AUDIO_LEVEL_SILENT: u8 = 127;

const MAX_ID_ONE_BYTE_FORM: u8 = 14;
const MAX_LEN_ONE_BYTE_FORM: usize = 16;
const MAX_LEN_TWO_BYTE_FORM: usize = 255;

// All header extensions must have a common "form", either using
// 1 byte for the (ID, len) or 2 bytes for the (ID, len).
// If one extension requires the two byte form
// (probably because of its size, but possibly because of ID),
// The form must be the two-byte variety for all of them.
/// Header extension form as given by the profile tag.
#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExtensionsForm {
    /// RFC 8285 Section 4.2. Ids 1..=14, data length 1..=16.
    OneByte = 0xBEDE,
    /// RFC 8285 Section 4.3. Ids 1..=255, data length 0..=255.
    TwoByte = 0x1000,
}

impl ExtensionsForm {
    pub(crate) fn as_u16(self) -> u16 {
        self as u16
    }

    /// Profile tag with the 4 app bits of the two-byte form. The one-byte
    /// form has none.
    pub(crate) fn serialize(self, app_bits: u8) -> [u8; 2] {
        match self {
            ExtensionsForm::OneByte => self.as_u16().to_be_bytes(),
            ExtensionsForm::TwoByte => (self.as_u16() | (app_bits & 0x0f) as u16).to_be_bytes(),
        }
    }

    /// Recognise a profile tag. Anything else is not an extension block we
    /// can interpret.
    pub fn parse(bytes: [u8; 2]) -> Option<Self> {
        let serialized = u16::from_be_bytes(bytes);
        if serialized == ExtensionsForm::OneByte.as_u16() {
            Some(ExtensionsForm::OneByte)
        // Ignore the app bits
        } else if (serialized & 0xFFF0) == ExtensionsForm::TwoByte.as_u16() {
            Some(ExtensionsForm::TwoByte)
        } else {
            None
        }
    }

    fn fits(id: u8, len: usize) -> Self {
        if id <= MAX_ID_ONE_BYTE_FORM && len >= 1 && len <= MAX_LEN_ONE_BYTE_FORM {
            ExtensionsForm::OneByte
        } else {
            ExtensionsForm::TwoByte
        }
    }

    fn element_overhead(self) -> usize {
        match self {
            ExtensionsForm::OneByte => 1,
            ExtensionsForm::TwoByte => 2,
        }
    }
}

/// RFC 6464 client-to-mixer audio level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLevel {
    /// Level in -dBov, 0 (loudest) to 127 (silent).
    pub level: u8,
    /// Voice activity flag, if the sender set it.
    pub voice_activity: bool,
}

/// Iterator over the `(id, data)` elements of a header extension block.
pub struct ExtensionElements<'a> {
    buf: &'a [u8],
    form: ExtensionsForm,
}

impl<'a> Iterator for ExtensionElements<'a> {
    type Item = (u8, &'a [u8]);

    // https://tools.ietf.org/html/rfc5285
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.buf.is_empty() {
                return None;
            }

            if self.buf[0] == 0 {
                // padding
                self.buf = &self.buf[1..];
                continue;
            }

            let (id, len) = match self.form {
                ExtensionsForm::OneByte => {
                    let id = self.buf[0] >> 4;
                    let len = (self.buf[0] & 0xf) as usize + 1;

                    if id == 15 {
                        // If the ID value 15 is
                        // encountered, its length field should be ignored, processing of the
                        // entire extension should terminate at that point, and only the
                        // extension elements present prior to the element with ID 15
                        // considered.
                        self.buf = &[];
                        return None;
                    }
                    self.buf = &self.buf[1..];
                    (id, len)
                }
                ExtensionsForm::TwoByte => {
                    if self.buf.len() < 2 {
                        trace!("Not enough ext header len: {} < {}", self.buf.len(), 2);
                        self.buf = &[];
                        return None;
                    }
                    let id = self.buf[0];
                    let len = self.buf[1] as usize;
                    self.buf = &self.buf[2..];
                    (id, len)
                }
            };

            if self.buf.len() < len {
                trace!("Not enough type ext len: {} < {}", self.buf.len(), len);
                self.buf = &[];
                return None;
            }

            let data = &self.buf[..len];
            self.buf = &self.buf[len..];

            return Some((id, data));
        }
    }
}

impl PacketView {
    fn extension_start(&self) -> usize {
        FIXED_HEADER_SIZE + self.csrc_count() * 4
    }

    /// Length in bytes of the extension content, excluding the 4 byte
    /// profile/length header. 0 without an extension.
    pub fn extension_length(&self) -> usize {
        if !self.has_extension() {
            return 0;
        }
        let at = self.extension_start() + 2;
        self.read_u16(at).unwrap_or(0) as usize * 4
    }

    /// The profile tag of the extension block, if present.
    pub fn extension_profile(&self) -> Option<u16> {
        if !self.has_extension() {
            return None;
        }
        self.read_u16(self.extension_start())
    }

    /// Form of the extension block.
    ///
    /// `None` without an extension, or when the profile tag is not one of
    /// the RFC 8285 forms.
    pub fn extension_form(&self) -> Option<ExtensionsForm> {
        let tag = self.extension_profile()?;
        ExtensionsForm::parse(tag.to_be_bytes())
    }

    /// The elements of the extension block.
    ///
    /// Empty when there is no extension or its profile is unknown. Unknown
    /// profiles are never interpreted as element data.
    pub fn extension_elements(&self) -> ExtensionElements<'_> {
        let empty = ExtensionElements {
            buf: &[],
            form: ExtensionsForm::OneByte,
        };

        let Some(form) = self.extension_form() else {
            return empty;
        };

        let start = self.extension_start() + EXTENSION_HEADER_SIZE;
        let end = start + self.extension_length();
        if end > self.len() {
            trace!("RTP ext len larger than packet {} > {}", end, self.len());
            return empty;
        }

        ExtensionElements {
            buf: &self.as_slice()[start..end],
            form,
        }
    }

    /// Data of the extension element with `id`.
    pub fn header_extension(&self, id: u8) -> Option<&[u8]> {
        self.extension_elements()
            .find(|(i, _)| *i == id)
            .map(|(_, data)| data)
    }

    /// Add a header extension element.
    ///
    /// Installs a new extension block when there is none, otherwise appends
    /// to the existing one. The block uses the one-byte form unless an
    /// element needs the two-byte form, in which case all elements are
    /// rewritten in the two-byte form. The payload is moved to follow the
    /// grown block.
    pub fn add_extension(&mut self, id: u8, data: &[u8]) -> Result<(), PacketError> {
        if id == 0 {
            return Err(PacketError::ExtensionId(id));
        }
        if data.len() > MAX_LEN_TWO_BYTE_FORM {
            return Err(PacketError::ExtensionTooLarge(data.len()));
        }
        if self.is_invalid() {
            return Err(PacketError::Invalid);
        }

        let start = self.extension_start();
        let old_block = if self.has_extension() {
            EXTENSION_HEADER_SIZE + self.extension_length()
        } else {
            0
        };
        if start + old_block > self.len() {
            return Err(PacketError::Invalid);
        }

        if self.has_extension() && self.extension_form().is_none() {
            let tag = self.extension_profile().unwrap_or(0);
            return Err(PacketError::UnknownExtensionProfile(tag));
        }

        let mut elements: Vec<(u8, Vec<u8>)> = self
            .extension_elements()
            .map(|(i, d)| (i, d.to_vec()))
            .collect();
        elements.push((id, data.to_vec()));

        let form = if elements
            .iter()
            .all(|(i, d)| ExtensionsForm::fits(*i, d.len()) == ExtensionsForm::OneByte)
            && self.extension_form() != Some(ExtensionsForm::TwoByte)
        {
            ExtensionsForm::OneByte
        } else {
            ExtensionsForm::TwoByte
        };

        // Appending to a two-byte block keeps its app bits.
        let app_bits = match self.extension_form() {
            Some(ExtensionsForm::TwoByte) => self.extension_profile().unwrap_or(0) as u8 & 0x0f,
            _ => 0,
        };

        let block = write_block(&elements, form, app_bits);
        self.splice(start, old_block, &block);
        self.set_extension_bit(true);

        Ok(())
    }

    /// Remove the extension block and its content, moving the payload forward.
    ///
    /// Does nothing if there is no extension.
    pub fn remove_extension(&mut self) {
        if !self.has_extension() {
            return;
        }

        let start = self.extension_start();
        let block = EXTENSION_HEADER_SIZE + self.extension_length();
        if start + block > self.len() {
            trace!("Not removing RTP ext that overruns packet");
            return;
        }

        self.splice(start, block, &[]);
        self.set_extension_bit(false);
    }

    /// RFC 6464 audio level from the extension with `id`.
    pub fn ssrc_audio_level(&self, id: u8) -> Option<AudioLevel> {
        let data = self.header_extension(id)?;
        let b = *data.first()?;
        Some(AudioLevel {
            level: b & 0x7f,
            voice_activity: b & 0x80 > 0,
        })
    }

    /// RFC 6465 audio level of the CSRC at `index`, from the extension with `id`.
    ///
    /// A peer may send fewer levels than there are CSRCs; missing levels read
    /// as [`AUDIO_LEVEL_SILENT`].
    pub fn csrc_audio_level(&self, id: u8, index: usize) -> u8 {
        self.header_extension(id)
            .and_then(|d| d.get(index))
            .map(|b| b & 0x7f)
            .unwrap_or(AUDIO_LEVEL_SILENT)
    }

    /// Every CSRC paired with its RFC 6465 audio level.
    pub fn csrc_audio_levels(&self, id: u8) -> Vec<(u32, u8)> {
        self.csrc_list()
            .into_iter()
            .enumerate()
            .map(|(i, csrc)| (csrc, self.csrc_audio_level(id, i)))
            .collect()
    }
}

fn write_block(elements: &[(u8, Vec<u8>)], form: ExtensionsForm, app_bits: u8) -> Vec<u8> {
    let content: usize = elements
        .iter()
        .map(|(_, d)| form.element_overhead() + d.len())
        .sum();
    let padded = (content + 3) / 4 * 4;

    let mut block = Vec::with_capacity(EXTENSION_HEADER_SIZE + padded);
    block.extend_from_slice(&form.serialize(app_bits));
    block.extend_from_slice(&((padded / 4) as u16).to_be_bytes());

    for (id, data) in elements {
        match form {
            ExtensionsForm::OneByte => {
                block.push(*id << 4 | (data.len() as u8 - 1));
            }
            ExtensionsForm::TwoByte => {
                block.push(*id);
                block.push(data.len() as u8);
            }
        }
        block.extend_from_slice(data);
    }

    block.resize(EXTENSION_HEADER_SIZE + padded, 0);
    block
}

#[cfg(test)]
mod test {
    use super::*;

    fn packet(payload: &[u8]) -> PacketView {
        let mut v = vec![0x80, 0x6f, 0x00, 0x01, 0, 0, 0, 100, 0, 0, 0, 42];
        v.extend_from_slice(payload);
        PacketView::from_vec(v)
    }

    #[test]
    fn add_one_byte_extension() {
        let mut p = packet(&[1, 2, 3, 4, 5]);
        p.add_extension(3, &[0xaa]).unwrap();

        assert!(p.has_extension());
        assert_eq!(p.extension_form(), Some(ExtensionsForm::OneByte));
        assert_eq!(p.extension_length(), 4);
        assert_eq!(p.header_length(), 20);
        assert_eq!(p.payload(), &[1, 2, 3, 4, 5]);
        assert_eq!(
            &p.as_slice()[12..20],
            &[0xBE, 0xDE, 0, 1, 0x30, 0xaa, 0, 0]
        );
        assert_eq!(p.header_extension(3), Some(&[0xaa][..]));
        assert_eq!(p.header_extension(4), None);
    }

    #[test]
    fn append_to_existing_extension() {
        let mut p = packet(&[1, 2, 3]);
        p.add_extension(1, &[1, 2, 3]).unwrap();
        assert_eq!(p.extension_length(), 4);

        p.add_extension(2, &[4, 5, 6, 7]).unwrap();
        // 4 + 5 bytes of elements rounds up to 3 words
        assert_eq!(p.extension_length(), 12);
        assert_eq!(p.header_extension(1), Some(&[1, 2, 3][..]));
        assert_eq!(p.header_extension(2), Some(&[4, 5, 6, 7][..]));
        assert_eq!(p.payload(), &[1, 2, 3]);
    }

    #[test]
    fn two_byte_form_when_needed() {
        let mut p = packet(&[9]);
        p.add_extension(1, &[1]).unwrap();
        assert_eq!(p.extension_form(), Some(ExtensionsForm::OneByte));

        // id above 14 forces the two byte form for all elements
        p.add_extension(20, &[7, 7]).unwrap();
        assert_eq!(p.extension_form(), Some(ExtensionsForm::TwoByte));
        assert_eq!(p.header_extension(1), Some(&[1][..]));
        assert_eq!(p.header_extension(20), Some(&[7, 7][..]));
        assert_eq!(p.payload(), &[9]);

        let big = vec![3_u8; 40];
        p.add_extension(2, &big).unwrap();
        assert_eq!(p.header_extension(2), Some(&big[..]));
        assert_eq!(p.extension_length() % 4, 0);
    }

    #[test]
    fn two_byte_append_keeps_app_bits() {
        // profile 0x1005, element id 1 len 2
        let mut v = vec![0x90, 0x6f, 0, 1, 0, 0, 0, 100, 0, 0, 0, 42];
        v.extend_from_slice(&[0x10, 0x05, 0, 1, 0x01, 0x02, 0xaa, 0xbb]);
        v.extend_from_slice(&[5, 5]);
        let mut p = PacketView::from_vec(v);
        assert_eq!(p.extension_form(), Some(ExtensionsForm::TwoByte));

        p.add_extension(3, &[0xcc]).unwrap();
        assert_eq!(p.extension_profile(), Some(0x1005));
        assert_eq!(p.extension_form(), Some(ExtensionsForm::TwoByte));
        assert_eq!(p.header_extension(1), Some(&[0xaa, 0xbb][..]));
        assert_eq!(p.header_extension(3), Some(&[0xcc][..]));
        assert_eq!(p.payload(), &[5, 5]);

        // promotion from one byte starts with cleared app bits
        let mut p = packet(&[]);
        p.add_extension(1, &[1]).unwrap();
        p.add_extension(200, &[2]).unwrap();
        assert_eq!(p.extension_profile(), Some(0x1000));
    }

    #[test]
    fn invalid_ids() {
        let mut p = packet(&[]);
        assert_eq!(p.add_extension(0, &[1]), Err(PacketError::ExtensionId(0)));
        assert_eq!(
            p.add_extension(1, &[0; 256]),
            Err(PacketError::ExtensionTooLarge(256))
        );
        assert!(!p.has_extension());
    }

    #[test]
    fn extension_round_trip() {
        for _ in 0..200 {
            let len = fastrand::usize(0..64);
            let payload: Vec<u8> = (0..len).map(|_| fastrand::u8(..)).collect();
            let original = packet(&payload);

            let mut p = original.clone();
            let id = fastrand::u8(1..=255);
            let data: Vec<u8> = (0..fastrand::usize(1..=32)).map(|_| fastrand::u8(..)).collect();
            p.add_extension(id, &data).unwrap();
            assert_eq!(p.header_extension(id), Some(&data[..]));
            assert_eq!(p.payload(), &payload[..]);

            p.remove_extension();
            assert!(!p.has_extension());
            assert_eq!(p.header_length(), original.header_length());
            assert_eq!(p.as_slice(), original.as_slice());
        }
    }

    #[test]
    fn remove_without_extension_is_noop() {
        let mut p = packet(&[1, 2]);
        p.remove_extension();
        assert_eq!(p.as_slice(), packet(&[1, 2]).as_slice());
    }

    #[test]
    fn unknown_profile_is_not_parsed() {
        // profile 0x1234 with one word of content
        let mut v = vec![0x90, 0x6f, 0, 1, 0, 0, 0, 100, 0, 0, 0, 42];
        v.extend_from_slice(&[0x12, 0x34, 0, 1, 0x30, 0xaa, 0, 0]);
        v.extend_from_slice(&[5, 5]);
        let mut p = PacketView::from_vec(v);

        assert_eq!(p.extension_profile(), Some(0x1234));
        assert_eq!(p.extension_form(), None);
        assert_eq!(p.extension_length(), 4);
        assert_eq!(p.header_extension(3), None);
        assert_eq!(p.extension_elements().count(), 0);
        assert_eq!(p.payload(), &[5, 5]);
        assert_eq!(
            p.add_extension(1, &[1]),
            Err(PacketError::UnknownExtensionProfile(0x1234))
        );

        // removal works regardless of profile
        p.remove_extension();
        assert_eq!(p.payload(), &[5, 5]);
        assert_eq!(p.len(), 14);
    }

    #[test]
    fn one_byte_id_15_terminates() {
        let mut v = vec![0x90, 0x6f, 0, 1, 0, 0, 0, 100, 0, 0, 0, 42];
        v.extend_from_slice(&[0xBE, 0xDE, 0, 1, 0x10, 0x01, 0xf0, 0x22]);
        let p = PacketView::from_vec(v);
        let els: Vec<_> = p.extension_elements().collect();
        assert_eq!(els, vec![(1, &[0x01][..])]);
    }

    #[test]
    fn ssrc_audio_level() {
        let mut p = packet(&[]);
        p.add_extension(1, &[0x80 | 42]).unwrap();
        assert_eq!(
            p.ssrc_audio_level(1),
            Some(AudioLevel {
                level: 42,
                voice_activity: true
            })
        );
        assert_eq!(p.ssrc_audio_level(2), None);
    }

    #[test]
    fn csrc_audio_levels_tolerate_short_list() {
        let mut p = packet(&[1, 2, 3]);
        p.set_csrc_list(&[100, 200, 300]).unwrap();
        // only two levels for three csrcs
        p.add_extension(5, &[10, 20]).unwrap();

        assert_eq!(p.csrc_audio_level(5, 0), 10);
        assert_eq!(p.csrc_audio_level(5, 1), 20);
        assert_eq!(p.csrc_audio_level(5, 2), AUDIO_LEVEL_SILENT);
        assert_eq!(p.csrc_audio_level(6, 0), AUDIO_LEVEL_SILENT);
        assert_eq!(
            p.csrc_audio_levels(5),
            vec![(100, 10), (200, 20), (300, AUDIO_LEVEL_SILENT)]
        );
        assert_eq!(p.payload(), &[1, 2, 3]);
    }
}
