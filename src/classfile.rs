//! Class-definition decoding.
//!
//! The pipeline only depends on the [`ClassfileDecoder`] trait. The bundled
//! [`ClassfileHeaderDecoder`] reads the class header (constant pool, access
//! flags, this/super class and interfaces) and leaves members alone, which is
//! enough for graph linking.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::config::ScanSpec;
use crate::error::ScanError;
use crate::resource::Resource;

const MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_ANNOTATION: u16 = 0x2000;
pub const ACC_ENUM: u16 = 0x4000;
pub const ACC_MODULE: u16 = 0x8000;

/// Canonicalizes strings produced by decoders running on many workers.
#[derive(Debug, Default)]
pub struct StringInterner {
    map: DashMap<Arc<str>, ()>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, value: &str) -> Arc<str> {
        if let Some(existing) = self.map.get(value) {
            return existing.key().clone();
        }
        match self.map.entry(Arc::from(value)) {
            Entry::Occupied(e) => e.key().clone(),
            Entry::Vacant(e) => {
                let key = e.key().clone();
                e.insert(());
                key
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Decoder output for one class definition, before cross-class linking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlinkedClassInfo {
    pub class_name: Arc<str>,
    pub super_class: Option<Arc<str>>,
    pub interfaces: Vec<Arc<str>>,
    pub access_flags: u16,
    pub major_version: u16,
    pub minor_version: u16,
    pub classpath_element: Arc<Path>,
    pub relative_path: String,
    pub content_hash: String,
}

impl UnlinkedClassInfo {
    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0 && !self.is_annotation()
    }

    pub fn is_annotation(&self) -> bool {
        self.access_flags & ACC_ANNOTATION != 0
    }

    pub fn is_enum(&self) -> bool {
        self.access_flags & ACC_ENUM != 0
    }
}

pub trait ClassfileDecoder: Send + Sync {
    fn decode(
        &self,
        resource: &Resource,
        input: &mut dyn Read,
        spec: &ScanSpec,
        interner: &StringInterner,
    ) -> Result<UnlinkedClassInfo, ScanError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClassfileHeaderDecoder;

impl ClassfileDecoder for ClassfileHeaderDecoder {
    fn decode(
        &self,
        resource: &Resource,
        input: &mut dyn Read,
        _spec: &ScanSpec,
        interner: &StringInterner,
    ) -> Result<UnlinkedClassInfo, ScanError> {
        let mut bytes = Vec::with_capacity(resource.size().min(1 << 20) as usize);
        input
            .read_to_end(&mut bytes)
            .map_err(|e| ScanError::decode(resource, format!("read failed: {e}")))?;

        let header = parse_header(&bytes).map_err(|msg| ScanError::decode(resource, msg))?;

        let expected = format!("{}.class", header.this_class);
        if header.access_flags & ACC_MODULE == 0 && expected != resource.relative_path() {
            return Err(ScanError::decode(
                resource,
                format!(
                    "class {} does not match its path {}",
                    header.this_class,
                    resource.relative_path()
                ),
            ));
        }

        Ok(UnlinkedClassInfo {
            class_name: interner.intern(&header.this_class.replace('/', ".")),
            super_class: header
                .super_class
                .map(|s| interner.intern(&s.replace('/', "."))),
            interfaces: header
                .interfaces
                .iter()
                .map(|i| interner.intern(&i.replace('/', ".")))
                .collect(),
            access_flags: header.access_flags,
            major_version: header.major_version,
            minor_version: header.minor_version,
            classpath_element: Arc::from(resource.element()),
            relative_path: resource.relative_path().to_string(),
            content_hash: hash_content(&bytes),
        })
    }
}

pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[derive(Debug)]
struct ClassHeader {
    minor_version: u16,
    major_version: u16,
    access_flags: u16,
    this_class: String,
    super_class: Option<String>,
    interfaces: Vec<String>,
}

enum Constant {
    Utf8(String),
    Class(u16),
    Other,
    Unusable,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| format!("truncated at offset {}", self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn parse_header(bytes: &[u8]) -> Result<ClassHeader, String> {
    let mut cur = Cursor { buf: bytes, pos: 0 };
    let magic = cur.u32()?;
    if magic != MAGIC {
        return Err(format!("bad magic 0x{magic:08X}"));
    }
    let minor_version = cur.u16()?;
    let major_version = cur.u16()?;

    let count = cur.u16()? as usize;
    let mut pool: Vec<Constant> = Vec::with_capacity(count);
    pool.push(Constant::Unusable);
    while pool.len() < count {
        let tag = cur.u8()?;
        let constant = match tag {
            1 => {
                let len = cur.u16()? as usize;
                Constant::Utf8(String::from_utf8_lossy(cur.take(len)?).into_owned())
            }
            7 => Constant::Class(cur.u16()?),
            3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                cur.take(4)?;
                Constant::Other
            }
            5 | 6 => {
                cur.take(8)?;
                pool.push(Constant::Other);
                Constant::Unusable
            }
            8 | 16 | 19 | 20 => {
                cur.take(2)?;
                Constant::Other
            }
            15 => {
                cur.take(3)?;
                Constant::Other
            }
            other => return Err(format!("unknown constant pool tag {other}")),
        };
        pool.push(constant);
    }
    if pool.len() > count.max(1) {
        return Err("constant pool overruns its declared size".to_string());
    }

    let access_flags = cur.u16()?;
    let this_class = class_name(&pool, cur.u16()?)?;
    let super_index = cur.u16()?;
    let super_class = if super_index == 0 {
        None
    } else {
        Some(class_name(&pool, super_index)?)
    };

    let interface_count = cur.u16()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(class_name(&pool, cur.u16()?)?);
    }

    Ok(ClassHeader {
        minor_version,
        major_version,
        access_flags,
        this_class,
        super_class,
        interfaces,
    })
}

fn class_name(pool: &[Constant], index: u16) -> Result<String, String> {
    let Some(Constant::Class(name_index)) = pool.get(index as usize) else {
        return Err(format!("constant #{index} is not a class reference"));
    };
    match pool.get(*name_index as usize) {
        Some(Constant::Utf8(s)) => Ok(s.clone()),
        _ => Err(format!("constant #{name_index} is not a utf8 entry")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::resource::DirectoryResource;
    use std::path::PathBuf;

    /// Minimal class file: `name extends super_name implements interfaces`.
    pub(crate) fn class_bytes(name: &str, super_name: Option<&str>, interfaces: &[&str]) -> Vec<u8> {
        let mut classes = vec![name];
        classes.extend(super_name);
        classes.extend(interfaces.iter().copied());

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&52u16.to_be_bytes());
        // long constant up front to exercise the double slot
        let count = 1 + 2 + classes.len() * 2;
        out.extend_from_slice(&(count as u16).to_be_bytes());
        out.push(5);
        out.extend_from_slice(&42u64.to_be_bytes());
        for (i, c) in classes.iter().enumerate() {
            let utf8_index = 3 + i * 2;
            out.push(1);
            out.extend_from_slice(&(c.len() as u16).to_be_bytes());
            out.extend_from_slice(c.as_bytes());
            out.push(7);
            out.extend_from_slice(&(utf8_index as u16).to_be_bytes());
        }
        let class_index = |i: usize| (4 + i * 2) as u16;
        out.extend_from_slice(&(ACC_PUBLIC | ACC_ABSTRACT).to_be_bytes());
        out.extend_from_slice(&class_index(0).to_be_bytes());
        let super_index = if super_name.is_some() { class_index(1) } else { 0 };
        out.extend_from_slice(&super_index.to_be_bytes());
        out.extend_from_slice(&(interfaces.len() as u16).to_be_bytes());
        let first_iface = if super_name.is_some() { 2 } else { 1 };
        for i in 0..interfaces.len() {
            out.extend_from_slice(&class_index(first_iface + i).to_be_bytes());
        }
        // fields, methods, attributes
        out.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        out
    }

    fn resource(relative_path: &str, len: usize) -> Resource {
        Resource::InDirectory(DirectoryResource {
            element: Arc::from(Path::new("/cp/classes")),
            relative_path: relative_path.to_string(),
            path: PathBuf::from("/cp/classes").join(relative_path),
            size: len as u64,
        })
    }

    #[test]
    fn decodes_header_and_interns_names() {
        let bytes = class_bytes("pkg/Foo", Some("java/lang/Object"), &["java/io/Serializable"]);
        let interner = StringInterner::new();
        let spec = ScanSpec::default();

        let info = ClassfileHeaderDecoder
            .decode(&resource("pkg/Foo.class", bytes.len()), &mut &bytes[..], &spec, &interner)
            .unwrap();

        assert_eq!(&*info.class_name, "pkg.Foo");
        assert_eq!(info.super_class.as_deref(), Some("java.lang.Object"));
        assert_eq!(info.interfaces.len(), 1);
        assert_eq!(&*info.interfaces[0], "java.io.Serializable");
        assert_eq!(info.major_version, 52);
        assert_eq!(info.content_hash, hash_content(&bytes));
        assert!(!info.is_interface());

        let again = interner.intern("java.lang.Object");
        assert!(Arc::ptr_eq(&again, info.super_class.as_ref().unwrap()));
        assert_eq!(interner.len(), 3);
    }

    #[test]
    fn access_flag_helpers_classify_kinds() {
        let bytes = class_bytes("pkg/Color", Some("java/lang/Enum"), &[]);
        let mut info = ClassfileHeaderDecoder
            .decode(
                &resource("pkg/Color.class", bytes.len()),
                &mut &bytes[..],
                &ScanSpec::default(),
                &StringInterner::new(),
            )
            .unwrap();

        info.access_flags = ACC_PUBLIC | ACC_FINAL | ACC_ENUM;
        assert!(info.is_enum());
        assert!(!info.is_interface());

        info.access_flags = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT | ACC_ANNOTATION;
        assert!(info.is_annotation());
        assert!(!info.is_interface());
        assert!(!info.is_enum());

        info.access_flags = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT;
        assert!(info.is_interface());
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let interner = StringInterner::new();
        let spec = ScanSpec::default();

        let junk = b"not a class".to_vec();
        let err = ClassfileHeaderDecoder
            .decode(&resource("pkg/Foo.class", junk.len()), &mut &junk[..], &spec, &interner)
            .unwrap_err();
        assert!(matches!(err, ScanError::Decode { .. }));

        let mut bytes = class_bytes("pkg/Foo", None, &[]);
        bytes.truncate(20);
        let err = ClassfileHeaderDecoder
            .decode(&resource("pkg/Foo.class", bytes.len()), &mut &bytes[..], &spec, &interner)
            .unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn rejects_class_stored_under_wrong_path() {
        let bytes = class_bytes("pkg/Foo", Some("java/lang/Object"), &[]);
        let err = ClassfileHeaderDecoder
            .decode(
                &resource("other/Foo.class", bytes.len()),
                &mut &bytes[..],
                &ScanSpec::default(),
                &StringInterner::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn interner_returns_one_instance_under_contention() {
        let interner = StringInterner::new();
        let handles: Vec<Arc<str>> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| interner.intern("java.lang.String")))
                .collect();
            workers.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(interner.len(), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
