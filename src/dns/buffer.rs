//! byte level handling of DNS packets, including name compression

use std::collections::BTreeMap;

use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum BufferError {
    EndOfBuffer,
    TooManyJumps,
    LabelTooLong,
}

type Result<T> = std::result::Result<T, BufferError>;

/// Common interface for the buffers that DNS packets are read from and
/// written to. Name compression state lives with the buffer, since pointer
/// offsets are only meaningful within a single packet.
pub trait PacketBuffer {
    fn read(&mut self) -> Result<u8>;
    fn get(&mut self, pos: usize) -> Result<u8>;
    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]>;
    fn write(&mut self, val: u8) -> Result<()>;
    fn set(&mut self, pos: usize, val: u8) -> Result<()>;
    fn pos(&self) -> usize;
    fn seek(&mut self, pos: usize) -> Result<()>;
    fn step(&mut self, steps: usize) -> Result<()>;

    fn find_label(&self, label: &str) -> Option<usize>;
    fn save_label(&mut self, label: &str, pos: usize);

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write(val)
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        self.write((val >> 8) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        self.write(((val >> 24) & 0xFF) as u8)?;
        self.write(((val >> 16) & 0xFF) as u8)?;
        self.write(((val >> 8) & 0xFF) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn set_u16(&mut self, pos: usize, val: u16) -> Result<()> {
        self.set(pos, (val >> 8) as u8)?;
        self.set(pos + 1, (val & 0xFF) as u8)?;

        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16> {
        let res = ((self.read()? as u16) << 8) | (self.read()? as u16);

        Ok(res)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let res = ((self.read()? as u32) << 24)
            | ((self.read()? as u32) << 16)
            | ((self.read()? as u32) << 8)
            | (self.read()? as u32);

        Ok(res)
    }

    /// Write a domain name as a sequence of length-prefixed labels,
    /// compressing suffixes that have already been written to this buffer.
    fn write_qname(&mut self, qname: &str) -> Result<()> {
        if qname.is_empty() {
            return self.write_u8(0);
        }

        let labels = qname.split('.').collect::<Vec<&str>>();

        let mut jumped = false;
        for (i, label) in labels.iter().enumerate() {
            let suffix = labels[i..].join(".");

            // Reuse an earlier occurrence of the same suffix if possible
            if let Some(prev_pos) = self.find_label(&suffix) {
                let jump_inst = (prev_pos as u16) | 0xC000;
                self.write_u16(jump_inst)?;
                jumped = true;
                break;
            }

            let pos = self.pos();
            self.save_label(&suffix, pos);

            let len = label.len();
            if len > 0x3F {
                return Err(BufferError::LabelTooLong);
            }

            self.write_u8(len as u8)?;
            for b in label.as_bytes() {
                self.write_u8(*b)?;
            }
        }

        if !jumped {
            self.write_u8(0)?;
        }

        Ok(())
    }

    /// Read a domain name, following compression pointers. A pointer is a
    /// length byte with the top two bits set, combined with the following
    /// byte into a 14-bit offset. The number of jumps is capped to defeat
    /// pointer loops in hostile packets.
    fn read_qname(&mut self, outstr: &mut String) -> Result<()> {
        let mut pos = self.pos();
        let mut jumped = false;
        let mut jumps_performed = 0;
        let max_jumps = 5;

        let mut delim = "";
        loop {
            if jumps_performed > max_jumps {
                return Err(BufferError::TooManyJumps);
            }

            let len = self.get(pos)?;

            if (len & 0xC0) == 0xC0 {
                // The read position only moves past the two pointer bytes
                // for the first jump; later jumps happen off to the side.
                if !jumped {
                    self.seek(pos + 2)?;
                }

                let b2 = self.get(pos + 1)? as u16;
                let offset = (((len as u16) ^ 0xC000) << 8) | b2;
                pos = offset as usize;

                jumped = true;
                jumps_performed += 1;
                continue;
            }

            pos += 1;

            if len == 0 {
                break;
            }

            outstr.push_str(delim);

            let str_buffer = self.get_range(pos, len as usize)?;
            outstr.push_str(&String::from_utf8_lossy(str_buffer));

            delim = ".";

            pos += len as usize;
        }

        if !jumped {
            self.seek(pos)?;
        }

        Ok(())
    }
}

/// A fixed-size buffer on the stack, used for reading datagrams straight
/// off a socket. Writing through it does not compress names.
pub struct BytePacketBuffer {
    pub buf: [u8; 4096],
    pub pos: usize,
}

impl Default for BytePacketBuffer {
    fn default() -> Self {
        BytePacketBuffer::new()
    }
}

impl BytePacketBuffer {
    pub fn new() -> BytePacketBuffer {
        BytePacketBuffer {
            buf: [0; 4096],
            pos: 0,
        }
    }
}

impl PacketBuffer for BytePacketBuffer {
    fn read(&mut self) -> Result<u8> {
        if self.pos >= self.buf.len() {
            return Err(BufferError::EndOfBuffer);
        }
        let res = self.buf[self.pos];
        self.pos += 1;

        Ok(res)
    }

    fn get(&mut self, pos: usize) -> Result<u8> {
        if pos >= self.buf.len() {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(self.buf[pos])
    }

    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > self.buf.len() {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(&self.buf[start..start + len])
    }

    fn write(&mut self, val: u8) -> Result<()> {
        if self.pos >= self.buf.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.buf[self.pos] = val;
        self.pos += 1;

        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        if pos >= self.buf.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.buf[pos] = val;

        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.pos += steps;

        Ok(())
    }

    fn find_label(&self, _: &str) -> Option<usize> {
        None
    }

    fn save_label(&mut self, _: &str, _: usize) {}
}

/// A growable buffer used for writing response and query packets. Keeps a
/// map of written label suffixes so names can be compressed.
#[derive(Default)]
pub struct VectorPacketBuffer {
    pub buffer: Vec<u8>,
    pub pos: usize,
    label_lookup: BTreeMap<String, usize>,
}

impl VectorPacketBuffer {
    pub fn new() -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: Vec::new(),
            pos: 0,
            label_lookup: BTreeMap::new(),
        }
    }
}

impl PacketBuffer for VectorPacketBuffer {
    fn read(&mut self) -> Result<u8> {
        if self.pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        let res = self.buffer[self.pos];
        self.pos += 1;

        Ok(res)
    }

    fn get(&mut self, pos: usize) -> Result<u8> {
        if pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(self.buffer[pos])
    }

    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(&self.buffer[start..start + len])
    }

    fn write(&mut self, val: u8) -> Result<()> {
        self.buffer.push(val);
        self.pos += 1;

        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        if pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.buffer[pos] = val;

        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.pos += steps;

        Ok(())
    }

    fn find_label(&self, label: &str) -> Option<usize> {
        self.label_lookup.get(label).cloned()
    }

    fn save_label(&mut self, label: &str, pos: usize) {
        self.label_lookup.insert(label.to_string(), pos);
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_qname_roundtrip() {
        let mut buffer = VectorPacketBuffer::new();
        buffer.write_qname("www.example.com").unwrap();

        buffer.seek(0).unwrap();

        let mut qname = String::new();
        buffer.read_qname(&mut qname).unwrap();

        assert_eq!("www.example.com", qname);
    }

    #[test]
    fn test_qname_compression() {
        let mut buffer = VectorPacketBuffer::new();

        buffer.write_qname("ns1.example.com").unwrap();
        let uncompressed_len = buffer.pos();

        // The shared suffix collapses into a two byte pointer
        buffer.write_qname("ns2.example.com").unwrap();
        assert_eq!(uncompressed_len + 6, buffer.pos());

        buffer.seek(uncompressed_len).unwrap();
        let mut second = String::new();
        buffer.read_qname(&mut second).unwrap();
        assert_eq!("ns2.example.com", second);
    }

    #[test]
    fn test_root_name() {
        let mut buffer = VectorPacketBuffer::new();
        buffer.write_qname("").unwrap();
        assert_eq!(1, buffer.pos());

        buffer.seek(0).unwrap();
        let mut qname = String::new();
        buffer.read_qname(&mut qname).unwrap();
        assert_eq!("", qname);
    }

    #[test]
    fn test_pointer_loop_rejected() {
        let mut buffer = BytePacketBuffer::new();
        // A pointer at offset 0 that points back to itself
        buffer.buf[0] = 0xC0;
        buffer.buf[1] = 0x00;

        let mut qname = String::new();
        match buffer.read_qname(&mut qname) {
            Err(BufferError::TooManyJumps) => {}
            _ => panic!("expected the jump limit to trip"),
        }
    }

    #[test]
    fn test_oversized_label_rejected() {
        let long_label = "a".repeat(64);
        let mut buffer = VectorPacketBuffer::new();
        match buffer.write_qname(&format!("{}.com", long_label)) {
            Err(BufferError::LabelTooLong) => {}
            _ => panic!("expected oversized label to be rejected"),
        }
    }

    proptest! {
        #[test]
        fn prop_qname_roundtrip(labels in prop::collection::vec("[a-z0-9]{1,20}", 1..5)) {
            let name = labels.join(".");

            let mut buffer = VectorPacketBuffer::new();
            buffer.write_qname(&name).unwrap();
            buffer.seek(0).unwrap();

            let mut read_back = String::new();
            buffer.read_qname(&mut read_back).unwrap();

            prop_assert_eq!(name, read_back);
        }
    }
}
