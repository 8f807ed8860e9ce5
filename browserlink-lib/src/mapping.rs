//! Binary page-mapping records sent to the host's mapping-data verb.
//!
//! Each block is a little-endian `i32` type, a run of values and a `-1`
//! terminator. A value is its key, its value type and the payload: `i32`,
//! one byte for a boolean, or a 7-bit varint byte length followed by UTF-8.

use bytes::{BufMut, BytesMut};

use crate::error::Result;
use crate::stream::HostRequestStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MappingDataType {
    BeginContext = 1,
    EndContext = 2,
    RenderedOutputDefinition = 3,
    RenderedOutputRelationship = 4,
    EndOfData = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MappingDataValueType {
    Int32 = 1,
    Boolean = 2,
    String = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MappingDataValue {
    SourceStartPosition = 1,
    SourceLength = 2,
    SourceFilePath = 3,
    RenderedPosition = 4,
    RenderedOutputIndex = 5,
    RenderedContent = 6,
    IsLiteral = 7,
    ParentRenderedOutputIndex = 11,
    ChildRenderedOutputIndex = 12,
    RelativeRenderedPosition = 13,
    EndOfDataValues = -1,
}

/// Encodes one block at a time.
#[derive(Default)]
struct Block {
    buf: BytesMut,
}

impl Block {
    fn new(kind: MappingDataType) -> Self {
        let mut block = Self::default();
        block.buf.put_i32_le(kind as i32);
        block
    }

    fn int(mut self, key: MappingDataValue, value: i32) -> Self {
        self.buf.put_i32_le(key as i32);
        self.buf.put_i32_le(MappingDataValueType::Int32 as i32);
        self.buf.put_i32_le(value);
        self
    }

    fn boolean(mut self, key: MappingDataValue, value: bool) -> Self {
        self.buf.put_i32_le(key as i32);
        self.buf.put_i32_le(MappingDataValueType::Boolean as i32);
        self.buf.put_u8(value as u8);
        self
    }

    fn string(mut self, key: MappingDataValue, value: &str) -> Self {
        self.buf.put_i32_le(key as i32);
        self.buf.put_i32_le(MappingDataValueType::String as i32);
        put_7bit_len(&mut self.buf, value.len());
        self.buf.put_slice(value.as_bytes());
        self
    }

    fn finish(mut self) -> BytesMut {
        self.buf.put_i32_le(MappingDataValue::EndOfDataValues as i32);
        self.buf
    }
}

fn put_7bit_len(buf: &mut BytesMut, len: usize) {
    let mut v = len as u32;
    while v >= 0x80 {
        buf.put_u8((v as u8) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

/// Writes mapping blocks into a [`HostRequestStream`].
pub struct MappingDataWriter {
    stream: HostRequestStream,
    wrote_any_data: bool,
}

impl MappingDataWriter {
    pub fn new(stream: HostRequestStream) -> Self {
        Self { stream, wrote_any_data: false }
    }

    fn emit(&mut self, block: Block) {
        self.wrote_any_data = true;
        self.stream.write(&block.finish());
    }

    pub fn write_begin_context(
        &mut self,
        source_start_position: i32,
        source_length: i32,
        is_literal: bool,
        source_file_path: &str,
        rendered_output_index: i32,
        rendered_position: i32,
    ) {
        let block = Block::new(MappingDataType::BeginContext)
            .int(MappingDataValue::SourceStartPosition, source_start_position)
            .int(MappingDataValue::SourceLength, source_length)
            .boolean(MappingDataValue::IsLiteral, is_literal)
            .string(MappingDataValue::SourceFilePath, source_file_path)
            .int(MappingDataValue::RenderedOutputIndex, rendered_output_index)
            .int(MappingDataValue::RenderedPosition, rendered_position);
        self.emit(block);
    }

    pub fn write_end_context(&mut self, rendered_output_index: i32, rendered_position: i32) {
        let block = Block::new(MappingDataType::EndContext)
            .int(MappingDataValue::RenderedOutputIndex, rendered_output_index)
            .int(MappingDataValue::RenderedPosition, rendered_position);
        self.emit(block);
    }

    pub fn write_output_definition(&mut self, rendered_output_index: i32, rendered_content: &str) {
        let block = Block::new(MappingDataType::RenderedOutputDefinition)
            .int(MappingDataValue::RenderedOutputIndex, rendered_output_index)
            .string(MappingDataValue::RenderedContent, rendered_content);
        self.emit(block);
    }

    pub fn write_text_relationship(
        &mut self,
        parent_rendered_output_index: i32,
        child_rendered_output_index: i32,
        relative_rendered_position: i32,
    ) {
        let block = Block::new(MappingDataType::RenderedOutputRelationship)
            .int(MappingDataValue::ParentRenderedOutputIndex, parent_rendered_output_index)
            .int(MappingDataValue::ChildRenderedOutputIndex, child_rendered_output_index)
            .int(MappingDataValue::RelativeRenderedPosition, relative_rendered_position);
        self.emit(block);
    }

    /// Only written when at least one other block was.
    pub fn write_end_of_data(&mut self) {
        if self.wrote_any_data {
            self.emit(Block::new(MappingDataType::EndOfData));
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.close().await
    }
}
