//! Object reads

use std::fs::File;
use std::io::{self, BufReader, Read};

use crate::error::{PackError, Result};
use crate::needle::SectionReader;
use crate::object::{Object, ObjectKey};

use super::{LoadedObject, ObjectState, PackDevice};

/// Streams an object's data section
pub enum ObjectReader {
    Small(SectionReader),
    Large(BufReader<File>),
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ObjectReader::Small(reader) => reader.read(buf),
            ObjectReader::Large(reader) => reader.read(buf),
        }
    }
}

impl PackDevice {
    /// Reader over the data of a loaded object
    pub fn open_reader(&self, object: &LoadedObject) -> Result<ObjectReader> {
        match &object.object {
            Object::Small(needle) => {
                let bundle = self.bundle(object.key.partition)?;
                Ok(ObjectReader::Small(
                    bundle.section_reader(needle.data_offset, needle.data_size),
                ))
            }
            Object::Large(path) => Ok(ObjectReader::Large(BufReader::new(File::open(path)?))),
        }
    }

    /// Load and fully read an object; `NotFound` if it does not exist
    pub fn read_object(&self, key: &ObjectKey) -> Result<(LoadedObject, Vec<u8>)> {
        let object = match self.load_object_meta(key)? {
            ObjectState::Exists(object) => object,
            ObjectState::Deleted(_) | ObjectState::Missing => {
                return Err(PackError::NotFound(key.to_string()))
            }
        };
        let mut data = Vec::with_capacity(object.size() as usize);
        self.open_reader(&object)?.read_to_end(&mut data)?;
        Ok((object, data))
    }
}
