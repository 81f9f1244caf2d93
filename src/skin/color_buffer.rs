use std::io::{Read, Seek, Write};

use binrw::{BinRead, BinResult, BinWrite, Endian};

use super::vertex::SoftSkinVertex;
use crate::error::{Result, SkinError};
use crate::math::VertexColor;

const COLOR_STRIDE: u32 = 4;

/// One color per vertex, parallel to the LOD's vertex buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkinColorBuffer {
    colors: Vec<VertexColor>,
}

impl SkinColorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, vertices: &[SoftSkinVertex]) {
        self.colors = vertices.iter().map(|v| v.color).collect();
    }

    pub fn from_vertices(vertices: &[SoftSkinVertex]) -> Self {
        let mut buffer = Self::new();
        buffer.init(vertices);
        buffer
    }

    pub fn color(&self, index: usize) -> Result<VertexColor> {
        self.colors
            .get(index)
            .copied()
            .ok_or(SkinError::VertexOutOfRange {
                index,
                count: self.colors.len(),
            })
    }

    pub fn colors(&self) -> &[VertexColor] {
        &self.colors
    }

    pub fn num_vertices(&self) -> usize {
        self.colors.len()
    }

    pub fn stride(&self) -> usize {
        COLOR_STRIDE as usize
    }

    pub fn vertex_data_size(&self) -> usize {
        self.colors.len() * COLOR_STRIDE as usize
    }

    pub fn clean_up(&mut self) {
        self.colors = vec![];
    }
}

impl BinRead for SkinColorBuffer {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let element_size = u32::read_options(reader, endian, ())?;
        if element_size != COLOR_STRIDE {
            return Err(binrw::Error::AssertFail {
                pos,
                message: format!("Vertex color element size {} (expected {})", element_size, COLOR_STRIDE),
            });
        }
        let count = u32::read_options(reader, endian, ())?;
        let mut colors = Vec::new();
        for _ in 0..count {
            colors.push(VertexColor::read_options(reader, endian, ())?);
        }
        Ok(Self { colors })
    }
}

impl BinWrite for SkinColorBuffer {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        COLOR_STRIDE.write_options(writer, endian, ())?;
        (self.colors.len() as u32).write_options(writer, endian, ())?;
        for color in &self.colors {
            color.write_options(writer, endian, ())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use binrw::{BinReaderExt, BinWriterExt};

    use super::*;

    #[test]
    fn colors_follow_vertex_order() {
        let mut verts = vec![SoftSkinVertex::default(); 3];
        verts[1].color = VertexColor::new(1, 2, 3, 4);
        let buffer = SkinColorBuffer::from_vertices(&verts);
        assert_eq!(buffer.num_vertices(), 3);
        assert_eq!(buffer.color(0).unwrap(), VertexColor::WHITE);
        assert_eq!(buffer.color(1).unwrap(), VertexColor::new(1, 2, 3, 4));
        assert!(matches!(
            buffer.color(3),
            Err(SkinError::VertexOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn color_buffer_roundtrip() {
        let mut verts = vec![SoftSkinVertex::default(); 2];
        verts[0].color = VertexColor::new(9, 8, 7, 6);
        let buffer = SkinColorBuffer::from_vertices(&verts);

        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&buffer).unwrap();
        assert_eq!(cursor.get_ref().len(), 8 + 2 * 4);
        cursor.set_position(0);
        let back: SkinColorBuffer = cursor.read_le().unwrap();
        assert_eq!(back, buffer);
    }
}
