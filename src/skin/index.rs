//! Index buffer stored as 16-bit or 32-bit values and always read back as u32.

use std::io::{Read, Seek, Write};

use binrw::{BinRead, BinResult, BinWrite, Endian};
use serde::{Deserialize, Serialize};

use super::version::SKIN_VERSION_DWORD_INDICES;
use crate::error::{Result, SkinError};
use crate::validation::limits::MAX_16BIT_INDEXED_VERTICES;

/// Narrowest index width able to address `num_vertices` vertices.
pub fn required_index_width(num_vertices: usize) -> u8 {
    if num_vertices < MAX_16BIT_INDEXED_VERTICES {
        2
    } else {
        4
    }
}

/// Snapshot of an index buffer used to rebuild a container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexBufferData {
    pub indices: Vec<u32>,
    pub data_type_size: u8,
    pub num_verts_per_instance: u32,
    pub needs_cpu_access: bool,
    pub set_up_for_instancing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexStorage {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexStorage {
    fn with_width(width: u8) -> Self {
        if width == 2 {
            IndexStorage::U16(vec![])
        } else {
            IndexStorage::U32(vec![])
        }
    }

    fn len(&self) -> usize {
        match self {
            IndexStorage::U16(v) => v.len(),
            IndexStorage::U32(v) => v.len(),
        }
    }
}

fn check_width(width: u8) -> Result<()> {
    match width {
        2 | 4 => Ok(()),
        _ => Err(SkinError::InvalidIndexWidth(width)),
    }
}

fn narrow(indices: &[u32]) -> Result<Vec<u16>> {
    indices
        .iter()
        .enumerate()
        .map(|(position, &value)| {
            u16::try_from(value).map_err(|_| SkinError::IndexWidthOverflow {
                position,
                value,
                width: 2,
            })
        })
        .collect()
}

/// Index buffer abstracted over its storage width.
#[derive(Debug, Clone)]
pub struct MultiSizeIndexContainer {
    data_type_size: u8,
    needs_cpu_access: bool,
    storage: Option<IndexStorage>,
}

impl Default for MultiSizeIndexContainer {
    fn default() -> Self {
        Self {
            data_type_size: 2,
            needs_cpu_access: false,
            storage: None,
        }
    }
}

/// Same width, CPU access flag and widened contents; an empty container
/// equals one that was never created.
impl PartialEq for MultiSizeIndexContainer {
    fn eq(&self, other: &Self) -> bool {
        self.data_type_size == other.data_type_size
            && self.needs_cpu_access == other.needs_cpu_access
            && self.get_index_buffer() == other.get_index_buffer()
    }
}

impl Eq for MultiSizeIndexContainer {}

impl MultiSizeIndexContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Container already holding `indices` at the narrowest width that
    /// addresses `num_vertices`.
    pub fn with_indices(indices: &[u32], num_vertices: usize) -> Result<Self> {
        let mut container = Self::new();
        container.create_index_buffer(required_index_width(num_vertices))?;
        container.copy_index_buffer(indices)?;
        Ok(container)
    }

    /// Allocates empty storage of the given width, dropping any current data.
    pub fn create_index_buffer(&mut self, width: u8) -> Result<()> {
        check_width(width)?;
        self.data_type_size = width;
        self.storage = Some(IndexStorage::with_width(width));
        Ok(())
    }

    /// Replaces storage and contents from a data snapshot.
    pub fn rebuild_index_buffer(&mut self, data: &IndexBufferData) -> Result<()> {
        check_width(data.data_type_size)?;
        let storage = if data.data_type_size == 2 {
            IndexStorage::U16(narrow(&data.indices)?)
        } else {
            IndexStorage::U32(data.indices.clone())
        };
        self.data_type_size = data.data_type_size;
        self.needs_cpu_access = data.needs_cpu_access;
        self.storage = Some(storage);
        Ok(())
    }

    pub fn is_created(&self) -> bool {
        self.storage.is_some()
    }

    pub fn data_type_size(&self) -> u8 {
        self.data_type_size
    }

    pub fn needs_cpu_access(&self) -> bool {
        self.needs_cpu_access
    }

    pub fn set_needs_cpu_access(&mut self, needs_cpu_access: bool) {
        self.needs_cpu_access = needs_cpu_access;
    }

    pub fn num_indices(&self) -> usize {
        self.storage.as_ref().map_or(0, IndexStorage::len)
    }

    pub fn index(&self, i: usize) -> Result<u32> {
        let count = self.num_indices();
        let value = match &self.storage {
            Some(IndexStorage::U16(v)) => v.get(i).map(|&x| x as u32),
            Some(IndexStorage::U32(v)) => v.get(i).copied(),
            None => None,
        };
        value.ok_or(SkinError::IndexOutOfRange { index: i, count })
    }

    /// Every index widened to u32.
    pub fn get_index_buffer(&self) -> Vec<u32> {
        match &self.storage {
            Some(IndexStorage::U16(v)) => v.iter().map(|&x| x as u32).collect(),
            Some(IndexStorage::U32(v)) => v.clone(),
            None => vec![],
        }
    }

    /// Replaces the contents keeping the current width. Values that do not
    /// fit a 2-byte container are rejected and the container is unchanged.
    pub fn copy_index_buffer(&mut self, indices: &[u32]) -> Result<()> {
        let storage = if self.data_type_size == 2 {
            IndexStorage::U16(narrow(indices)?)
        } else {
            IndexStorage::U32(indices.to_vec())
        };
        self.storage = Some(storage);
        Ok(())
    }

    /// Like `copy_index_buffer`, switching to 4-byte storage first when any
    /// value needs it.
    pub fn copy_index_buffer_widening(&mut self, indices: &[u32]) {
        if self.data_type_size == 2 && indices.iter().any(|&i| i > u16::MAX as u32) {
            log::debug!("widening index buffer to 32 bits for {} indices", indices.len());
            self.data_type_size = 4;
        }
        let storage = if self.data_type_size == 2 {
            IndexStorage::U16(indices.iter().map(|&i| i as u16).collect())
        } else {
            IndexStorage::U32(indices.to_vec())
        };
        self.storage = Some(storage);
    }

    pub fn get_index_buffer_data(&self) -> IndexBufferData {
        IndexBufferData {
            indices: self.get_index_buffer(),
            data_type_size: self.data_type_size,
            num_verts_per_instance: 0,
            needs_cpu_access: self.needs_cpu_access,
            set_up_for_instancing: false,
        }
    }

    /// Releases the index storage, keeping the width.
    pub fn strip_data(&mut self) {
        self.storage = None;
    }
}

impl BinRead for MultiSizeIndexContainer {
    type Args<'a> = (u32,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let version = args.0;
        if version < SKIN_VERSION_DWORD_INDICES {
            // legacy data: plain 16-bit array that stays CPU readable
            let count = u32::read_options(reader, endian, ())?;
            let mut indices = Vec::new();
            for _ in 0..count {
                indices.push(u16::read_options(reader, endian, ())?);
            }
            return Ok(MultiSizeIndexContainer {
                data_type_size: 2,
                needs_cpu_access: true,
                storage: Some(IndexStorage::U16(indices)),
            });
        }

        let pos = reader.stream_position()?;
        let needs_cpu_access = u32::read_options(reader, endian, ())? != 0;
        let data_type_size = u8::read_options(reader, endian, ())?;
        let count = u32::read_options(reader, endian, ())?;
        let storage = match data_type_size {
            2 => {
                let mut indices = Vec::new();
                for _ in 0..count {
                    indices.push(u16::read_options(reader, endian, ())?);
                }
                IndexStorage::U16(indices)
            }
            4 => {
                let mut indices = Vec::new();
                for _ in 0..count {
                    indices.push(u32::read_options(reader, endian, ())?);
                }
                IndexStorage::U32(indices)
            }
            other => {
                return Err(binrw::Error::AssertFail {
                    pos,
                    message: format!("Invalid index data type size {}", other),
                })
            }
        };

        Ok(MultiSizeIndexContainer {
            data_type_size,
            needs_cpu_access,
            storage: Some(storage),
        })
    }
}

impl BinWrite for MultiSizeIndexContainer {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        (self.needs_cpu_access as u32).write_options(writer, endian, ())?;
        self.data_type_size.write_options(writer, endian, ())?;
        (self.num_indices() as u32).write_options(writer, endian, ())?;
        match &self.storage {
            Some(IndexStorage::U16(v)) => {
                for index in v.iter() {
                    index.write_options(writer, endian, ())?;
                }
            }
            Some(IndexStorage::U32(v)) => {
                for index in v.iter() {
                    index.write_options(writer, endian, ())?;
                }
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use binrw::{BinReaderExt, BinWriterExt};

    use super::*;
    use crate::skin::version::{SKIN_VERSION, SKIN_VERSION_BASE};

    #[test]
    fn default_container_is_two_bytes_and_empty() {
        let c = MultiSizeIndexContainer::new();
        assert_eq!(c.data_type_size(), 2);
        assert!(!c.is_created());
        assert_eq!(c.num_indices(), 0);
        assert!(c.get_index_buffer().is_empty());
    }

    #[test]
    fn width_follows_vertex_count() {
        assert_eq!(required_index_width(3), 2);
        assert_eq!(required_index_width(0xFFFE), 2);
        assert_eq!(required_index_width(0xFFFF), 4);
        assert_eq!(required_index_width(70_000), 4);
    }

    #[test]
    fn invalid_width_rejected() {
        let mut c = MultiSizeIndexContainer::new();
        assert!(matches!(
            c.create_index_buffer(3),
            Err(SkinError::InvalidIndexWidth(3))
        ));
    }

    #[test]
    fn copy_into_two_bytes_rejects_large_index() {
        let mut c = MultiSizeIndexContainer::new();
        c.create_index_buffer(2).unwrap();
        c.copy_index_buffer(&[0, 1, 2]).unwrap();

        let err = c.copy_index_buffer(&[0, 65_536, 2]).unwrap_err();
        assert!(matches!(
            err,
            SkinError::IndexWidthOverflow {
                position: 1,
                value: 65_536,
                width: 2
            }
        ));
        // previous contents survive a rejected copy
        assert_eq!(c.get_index_buffer(), vec![0, 1, 2]);
    }

    #[test]
    fn widening_copy_switches_storage() {
        let mut c = MultiSizeIndexContainer::new();
        c.create_index_buffer(2).unwrap();
        c.copy_index_buffer_widening(&[5, 100_000]);
        assert_eq!(c.data_type_size(), 4);
        assert_eq!(c.get_index_buffer(), vec![5, 100_000]);
    }

    #[test]
    fn rebuild_from_data() {
        let mut c = MultiSizeIndexContainer::new();
        let data = IndexBufferData {
            indices: vec![9, 8, 7, 70_000],
            data_type_size: 4,
            needs_cpu_access: true,
            ..Default::default()
        };
        c.rebuild_index_buffer(&data).unwrap();
        assert_eq!(c.get_index_buffer(), data.indices);
        assert!(c.needs_cpu_access());
        assert_eq!(c.index(3).unwrap(), 70_000);
        assert!(c.index(4).is_err());
        assert_eq!(c.get_index_buffer_data().indices, data.indices);

        c.strip_data();
        assert!(!c.is_created());
        assert_eq!(c.data_type_size(), 4);
    }

    #[test]
    fn container_roundtrip_both_widths() {
        for width in [2u8, 4] {
            let mut c = MultiSizeIndexContainer::new();
            c.create_index_buffer(width).unwrap();
            c.copy_index_buffer(&[0, 1, 2, 2, 1, 3]).unwrap();
            c.set_needs_cpu_access(width == 4);

            let mut cursor = Cursor::new(Vec::new());
            cursor.write_le(&c).unwrap();
            // cpu flag + width + count + payload
            assert_eq!(cursor.get_ref().len(), 4 + 1 + 4 + 6 * width as usize);
            cursor.set_position(0);
            let back: MultiSizeIndexContainer = cursor.read_le_args((SKIN_VERSION,)).unwrap();
            assert_eq!(back, c);
        }
    }

    #[test]
    fn corrupt_index_count_fails_on_short_read() {
        let c = MultiSizeIndexContainer::with_indices(&[0, 1, 2], 3).unwrap();
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&c).unwrap();
        let mut bytes = cursor.into_inner();
        bytes[5..9].copy_from_slice(&u32::MAX.to_le_bytes());
        let res: BinResult<MultiSizeIndexContainer> = Cursor::new(bytes).read_le_args((SKIN_VERSION,));
        assert!(res.is_err());

        let legacy = u32::MAX.to_le_bytes().to_vec();
        let res: BinResult<MultiSizeIndexContainer> = Cursor::new(legacy).read_le_args((SKIN_VERSION_BASE,));
        assert!(res.is_err());
    }

    #[test]
    fn legacy_container_loads_as_cpu_visible_u16() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        for i in [4u16, 5, 6] {
            bytes.extend_from_slice(&i.to_le_bytes());
        }
        let c: MultiSizeIndexContainer =
            Cursor::new(bytes).read_le_args((SKIN_VERSION_BASE,)).unwrap();
        assert_eq!(c.data_type_size(), 2);
        assert!(c.needs_cpu_access());
        assert_eq!(c.get_index_buffer(), vec![4, 5, 6]);
    }
}
