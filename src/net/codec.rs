use crate::net::packet::{PacketReader, PacketWriter};

/// One serializable field of a wire record. Records declared with
/// `wire_record!` write and read their fields in declaration order,
/// little-endian, arrays and nested records inlined; a trailing `Vec<u8>`
/// field consumes the rest of the frame.
pub trait WireField: Sized {
    fn write_field(&self, writer: &mut PacketWriter);
    fn read_field(reader: &mut PacketReader<'_>) -> Option<Self>;
}

impl WireField for u8 {
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_u8(*self);
    }

    fn read_field(reader: &mut PacketReader<'_>) -> Option<Self> {
        reader.read_u8()
    }
}

impl WireField for u16 {
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_u16_le(*self);
    }

    fn read_field(reader: &mut PacketReader<'_>) -> Option<Self> {
        reader.read_u16_le()
    }
}

impl WireField for u32 {
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_u32_le(*self);
    }

    fn read_field(reader: &mut PacketReader<'_>) -> Option<Self> {
        reader.read_u32_le()
    }
}

impl WireField for u64 {
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_u64_le(*self);
    }

    fn read_field(reader: &mut PacketReader<'_>) -> Option<Self> {
        reader.read_u64_le()
    }
}

impl WireField for f32 {
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_f32_le(*self);
    }

    fn read_field(reader: &mut PacketReader<'_>) -> Option<Self> {
        reader.read_f32_le()
    }
}

impl<const N: usize> WireField for [u8; N] {
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_bytes(self);
    }

    fn read_field(reader: &mut PacketReader<'_>) -> Option<Self> {
        let mut out = [0u8; N];
        out.copy_from_slice(reader.read_bytes(N)?);
        Some(out)
    }
}

impl<const N: usize> WireField for [u16; N] {
    fn write_field(&self, writer: &mut PacketWriter) {
        for unit in self {
            writer.write_u16_le(*unit);
        }
    }

    fn read_field(reader: &mut PacketReader<'_>) -> Option<Self> {
        let mut out = [0u16; N];
        for slot in out.iter_mut() {
            *slot = reader.read_u16_le()?;
        }
        Some(out)
    }
}

impl<const N: usize> WireField for [u32; N] {
    fn write_field(&self, writer: &mut PacketWriter) {
        for word in self {
            writer.write_u32_le(*word);
        }
    }

    fn read_field(reader: &mut PacketReader<'_>) -> Option<Self> {
        let mut out = [0u32; N];
        for slot in out.iter_mut() {
            *slot = reader.read_u32_le()?;
        }
        Some(out)
    }
}

impl WireField for Vec<u8> {
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_bytes(self);
    }

    fn read_field(reader: &mut PacketReader<'_>) -> Option<Self> {
        let remaining = reader.remaining();
        Some(reader.read_bytes(remaining)?.to_vec())
    }
}

pub fn to_bytes<T: WireField>(record: &T) -> Vec<u8> {
    let mut writer = PacketWriter::new();
    record.write_field(&mut writer);
    writer.into_vec()
}

/// Decode a record from the start of a byte slice; trailing bytes beyond the
/// record are left unread. `None` means the slice underran a field.
pub fn from_bytes<T: WireField>(data: &[u8]) -> Option<T> {
    let mut reader = PacketReader::new(data);
    T::read_field(&mut reader)
}

macro_rules! wire_record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$field_meta:meta])* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $( $(#[$field_meta])* pub $field: $ty ),*
        }

        impl $crate::net::codec::WireField for $name {
            fn write_field(&self, writer: &mut $crate::net::packet::PacketWriter) {
                $( $crate::net::codec::WireField::write_field(&self.$field, writer); )*
            }

            fn read_field(reader: &mut $crate::net::packet::PacketReader<'_>) -> Option<Self> {
                Some(Self {
                    $( $field: <$ty as $crate::net::codec::WireField>::read_field(reader)? ),*
                })
            }
        }
    };
}

pub(crate) use wire_record;

#[cfg(test)]
mod tests {
    use super::*;

    wire_record! {
        pub struct Inner {
            pub kind: u8,
            pub value: u32,
        }
    }

    wire_record! {
        pub struct Outer {
            pub id: u16,
            pub inner: Inner,
            pub name: [u8; 4],
            pub wide: [u16; 2],
            pub tail: Vec<u8>,
        }
    }

    #[test]
    fn record_roundtrips_field_by_field() {
        let record = Outer {
            id: 0x0102,
            inner: Inner {
                kind: 7,
                value: 0xcafe_f00d,
            },
            name: *b"abcd",
            wide: [0x41, 0x42],
            tail: vec![9, 8, 7],
        };
        let bytes = to_bytes(&record);
        assert_eq!(bytes.len(), 2 + 5 + 4 + 4 + 3);
        let decoded: Outer = from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, record);
        assert_eq!(to_bytes(&decoded), bytes);
    }

    #[test]
    fn fields_serialize_in_declaration_order() {
        let record = Inner {
            kind: 0xaa,
            value: 0x0403_0201,
        };
        assert_eq!(to_bytes(&record), vec![0xaa, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn decode_fails_on_underrun() {
        let short = [0x01u8, 0x02, 0x03];
        assert_eq!(from_bytes::<Inner>(&short), None);
    }

    #[test]
    fn trailing_vec_consumes_remainder() {
        let bytes = [
            0x02, 0x01, // id
            0x07, 0x0d, 0xf0, 0xfe, 0xca, // inner
            b'a', b'b', b'c', b'd', // name
            0x41, 0x00, 0x42, 0x00, // wide
        ];
        let decoded: Outer = from_bytes(&bytes).expect("decode");
        assert!(decoded.tail.is_empty());
    }
}
