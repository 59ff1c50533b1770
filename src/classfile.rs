use anyhow::{Context, Result, bail};

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;

/// Mask covering the three visibility bits.
pub const VISIBILITY_MASK: u16 = ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED;

const MAGIC: u32 = 0xCAFE_BABE;

/// One constant-pool entry.
///
/// Utf8 payloads stay as raw bytes: pools may carry modified-UTF-8 string
/// literals that must survive a transform byte-for-byte. `Reserved` fills
/// index 0 and the phantom slot after each Long/Double so entry indices stay
/// positional.
#[derive(Clone, Debug, PartialEq)]
pub enum Const {
    Reserved,
    Utf8(Vec<u8>),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class { name: u16 },
    Str { utf8: u16 },
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType { descriptor: u16 },
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module { name: u16 },
    Package { name: u16 },
}

/// Attribute kept as an opaque payload. Only Code payloads are ever patched,
/// and only in ways that cannot move an instruction offset.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub info: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub access: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodInfo {
    pub access: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

/// Mutable class-file model: parse, edit by appending pool entries and
/// repointing index fields, serialize back.
#[derive(Clone, Debug)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: Vec<Const>,
    pub access: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<ClassFile> {
        let mut reader = Reader::new(bytes);
        if reader.u32()? != MAGIC {
            bail!("invalid class file magic");
        }
        let minor_version = reader.u16()?;
        let major_version = reader.u16()?;
        if major_version < 45 {
            bail!("unsupported class file major version: {major_version}");
        }

        let pool_count = reader.u16()? as usize;
        let mut pool = Vec::with_capacity(pool_count);
        pool.push(Const::Reserved);
        while pool.len() < pool_count {
            let entry = parse_const(&mut reader)?;
            let two_slots = matches!(entry, Const::Long(_) | Const::Double(_));
            pool.push(entry);
            if two_slots {
                pool.push(Const::Reserved);
            }
        }

        let access = reader.u16()?;
        let this_class = reader.u16()?;
        let super_class = reader.u16()?;

        let interface_count = reader.u16()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interfaces.push(reader.u16()?);
        }

        let field_count = reader.u16()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let (access, name_index, descriptor_index, attributes) = parse_member(&mut reader)?;
            fields.push(FieldInfo {
                access,
                name_index,
                descriptor_index,
                attributes,
            });
        }

        let method_count = reader.u16()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            let (access, name_index, descriptor_index, attributes) = parse_member(&mut reader)?;
            methods.push(MethodInfo {
                access,
                name_index,
                descriptor_index,
                attributes,
            });
        }

        let attributes = parse_attributes(&mut reader)?;
        if !reader.at_end() {
            bail!("trailing bytes after class file structure");
        }

        Ok(ClassFile {
            minor_version,
            major_version,
            pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        assert!(
            self.pool.len() <= u16::MAX as usize,
            "constant pool overflow"
        );
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&self.minor_version.to_be_bytes());
        out.extend_from_slice(&self.major_version.to_be_bytes());
        out.extend_from_slice(&(self.pool.len() as u16).to_be_bytes());
        for entry in self.pool.iter().skip(1) {
            write_const(&mut out, entry);
        }
        out.extend_from_slice(&self.access.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for interface in &self.interfaces {
            out.extend_from_slice(&interface.to_be_bytes());
        }
        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for field in &self.fields {
            write_member(
                &mut out,
                field.access,
                field.name_index,
                field.descriptor_index,
                &field.attributes,
            );
        }
        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            write_member(
                &mut out,
                method.access,
                method.name_index,
                method.descriptor_index,
                &method.attributes,
            );
        }
        write_attributes(&mut out, &self.attributes);
        out
    }

    pub fn const_at(&self, index: u16) -> Result<&Const> {
        self.pool
            .get(index as usize)
            .with_context(|| format!("constant pool index {index} out of bounds"))
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.const_at(index)? {
            Const::Utf8(bytes) => std::str::from_utf8(bytes)
                .with_context(|| format!("constant pool entry {index} is not valid UTF-8")),
            other => bail!("constant pool entry {index} is not Utf8: {other:?}"),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.const_at(index)? {
            Const::Class { name } => self.utf8(*name),
            other => bail!("constant pool entry {index} is not a Class: {other:?}"),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.const_at(index)? {
            Const::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?.to_string(), self.utf8(*descriptor)?.to_string()))
            }
            other => bail!("constant pool entry {index} is not a NameAndType: {other:?}"),
        }
    }

    pub fn this_class_name(&self) -> Result<&str> {
        self.class_name(self.this_class)
    }

    pub fn super_class_name(&self) -> Result<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        Ok(Some(self.class_name(self.super_class)?))
    }

    pub fn interface_names(&self) -> Result<Vec<String>> {
        self.interfaces
            .iter()
            .map(|index| Ok(self.class_name(*index)?.to_string()))
            .collect()
    }

    /// True when `attribute` is the method's Code attribute.
    pub fn is_code_attribute(&self, attribute: &AttributeInfo) -> bool {
        matches!(self.utf8(attribute.name_index), Ok("Code"))
    }

    /// Intern a Utf8 entry, reusing an existing identical one.
    pub fn intern_utf8(&mut self, value: &str) -> u16 {
        for (index, entry) in self.pool.iter().enumerate() {
            if let Const::Utf8(bytes) = entry
                && bytes.as_slice() == value.as_bytes()
            {
                return index as u16;
            }
        }
        self.push(Const::Utf8(value.as_bytes().to_vec()))
    }

    pub fn intern_class(&mut self, name: &str) -> u16 {
        for (index, entry) in self.pool.iter().enumerate() {
            if let Const::Class { name: name_index } = entry
                && self.utf8_matches(*name_index, name)
            {
                return index as u16;
            }
        }
        let name_index = self.intern_utf8(name);
        self.push(Const::Class { name: name_index })
    }

    pub fn intern_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        for (index, entry) in self.pool.iter().enumerate() {
            if let Const::NameAndType {
                name: name_index,
                descriptor: descriptor_index,
            } = entry
                && self.utf8_matches(*name_index, name)
                && self.utf8_matches(*descriptor_index, descriptor)
            {
                return index as u16;
            }
        }
        let name_index = self.intern_utf8(name);
        let descriptor_index = self.intern_utf8(descriptor);
        self.push(Const::NameAndType {
            name: name_index,
            descriptor: descriptor_index,
        })
    }

    pub fn intern_field_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.intern_class(class_name);
        let name_and_type = self.intern_name_and_type(name, descriptor);
        for (index, entry) in self.pool.iter().enumerate() {
            if let Const::FieldRef {
                class: entry_class,
                name_and_type: entry_nat,
            } = entry
                && *entry_class == class
                && *entry_nat == name_and_type
            {
                return index as u16;
            }
        }
        self.push(Const::FieldRef {
            class,
            name_and_type,
        })
    }

    pub fn intern_method_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.intern_class(class_name);
        let name_and_type = self.intern_name_and_type(name, descriptor);
        for (index, entry) in self.pool.iter().enumerate() {
            if let Const::MethodRef {
                class: entry_class,
                name_and_type: entry_nat,
            } = entry
                && *entry_class == class
                && *entry_nat == name_and_type
            {
                return index as u16;
            }
        }
        self.push(Const::MethodRef {
            class,
            name_and_type,
        })
    }

    fn utf8_matches(&self, index: u16, value: &str) -> bool {
        matches!(self.pool.get(index as usize), Some(Const::Utf8(bytes)) if bytes.as_slice() == value.as_bytes())
    }

    fn push(&mut self, entry: Const) -> u16 {
        let index = self.pool.len();
        // Entry 65535 would need a pool count that does not fit in u16.
        assert!(index < u16::MAX as usize, "constant pool overflow");
        self.pool.push(entry);
        index as u16
    }
}

/// Structure-only view of a class: the parts the supertype resolver and the
/// field-descriptor index need.
#[derive(Clone, Debug)]
pub struct ClassSummary {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub field_descriptors: Vec<(String, String)>,
}

impl ClassSummary {
    pub fn parse(bytes: &[u8]) -> Result<ClassSummary> {
        let class = ClassFile::parse(bytes)?;
        let mut field_descriptors = Vec::with_capacity(class.fields.len());
        for field in &class.fields {
            field_descriptors.push((
                class.utf8(field.name_index)?.to_string(),
                class.utf8(field.descriptor_index)?.to_string(),
            ));
        }
        Ok(ClassSummary {
            name: class.this_class_name()?.to_string(),
            super_name: class.super_class_name()?.map(str::to_string),
            interfaces: class.interface_names()?,
            field_descriptors,
        })
    }
}

fn parse_const(reader: &mut Reader<'_>) -> Result<Const> {
    let tag = reader.u8()?;
    let entry = match tag {
        1 => {
            let length = reader.u16()? as usize;
            Const::Utf8(reader.take(length)?.to_vec())
        }
        3 => Const::Integer(reader.u32()?),
        4 => Const::Float(reader.u32()?),
        5 => Const::Long(reader.u64()?),
        6 => Const::Double(reader.u64()?),
        7 => Const::Class { name: reader.u16()? },
        8 => Const::Str { utf8: reader.u16()? },
        9 => Const::FieldRef {
            class: reader.u16()?,
            name_and_type: reader.u16()?,
        },
        10 => Const::MethodRef {
            class: reader.u16()?,
            name_and_type: reader.u16()?,
        },
        11 => Const::InterfaceMethodRef {
            class: reader.u16()?,
            name_and_type: reader.u16()?,
        },
        12 => Const::NameAndType {
            name: reader.u16()?,
            descriptor: reader.u16()?,
        },
        15 => Const::MethodHandle {
            kind: reader.u8()?,
            reference: reader.u16()?,
        },
        16 => Const::MethodType {
            descriptor: reader.u16()?,
        },
        17 => Const::Dynamic {
            bootstrap: reader.u16()?,
            name_and_type: reader.u16()?,
        },
        18 => Const::InvokeDynamic {
            bootstrap: reader.u16()?,
            name_and_type: reader.u16()?,
        },
        19 => Const::Module { name: reader.u16()? },
        20 => Const::Package { name: reader.u16()? },
        _ => bail!("unknown constant pool tag: {tag}"),
    };
    Ok(entry)
}

fn write_const(out: &mut Vec<u8>, entry: &Const) {
    match entry {
        Const::Reserved => {}
        Const::Utf8(bytes) => {
            out.push(1);
            out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        Const::Integer(bits) => {
            out.push(3);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Const::Float(bits) => {
            out.push(4);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Const::Long(bits) => {
            out.push(5);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Const::Double(bits) => {
            out.push(6);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Const::Class { name } => {
            out.push(7);
            out.extend_from_slice(&name.to_be_bytes());
        }
        Const::Str { utf8 } => {
            out.push(8);
            out.extend_from_slice(&utf8.to_be_bytes());
        }
        Const::FieldRef {
            class,
            name_and_type,
        } => {
            out.push(9);
            out.extend_from_slice(&class.to_be_bytes());
            out.extend_from_slice(&name_and_type.to_be_bytes());
        }
        Const::MethodRef {
            class,
            name_and_type,
        } => {
            out.push(10);
            out.extend_from_slice(&class.to_be_bytes());
            out.extend_from_slice(&name_and_type.to_be_bytes());
        }
        Const::InterfaceMethodRef {
            class,
            name_and_type,
        } => {
            out.push(11);
            out.extend_from_slice(&class.to_be_bytes());
            out.extend_from_slice(&name_and_type.to_be_bytes());
        }
        Const::NameAndType { name, descriptor } => {
            out.push(12);
            out.extend_from_slice(&name.to_be_bytes());
            out.extend_from_slice(&descriptor.to_be_bytes());
        }
        Const::MethodHandle { kind, reference } => {
            out.push(15);
            out.push(*kind);
            out.extend_from_slice(&reference.to_be_bytes());
        }
        Const::MethodType { descriptor } => {
            out.push(16);
            out.extend_from_slice(&descriptor.to_be_bytes());
        }
        Const::Dynamic {
            bootstrap,
            name_and_type,
        } => {
            out.push(17);
            out.extend_from_slice(&bootstrap.to_be_bytes());
            out.extend_from_slice(&name_and_type.to_be_bytes());
        }
        Const::InvokeDynamic {
            bootstrap,
            name_and_type,
        } => {
            out.push(18);
            out.extend_from_slice(&bootstrap.to_be_bytes());
            out.extend_from_slice(&name_and_type.to_be_bytes());
        }
        Const::Module { name } => {
            out.push(19);
            out.extend_from_slice(&name.to_be_bytes());
        }
        Const::Package { name } => {
            out.push(20);
            out.extend_from_slice(&name.to_be_bytes());
        }
    }
}

fn parse_member(reader: &mut Reader<'_>) -> Result<(u16, u16, u16, Vec<AttributeInfo>)> {
    let access = reader.u16()?;
    let name_index = reader.u16()?;
    let descriptor_index = reader.u16()?;
    let attributes = parse_attributes(reader)?;
    Ok((access, name_index, descriptor_index, attributes))
}

fn parse_attributes(reader: &mut Reader<'_>) -> Result<Vec<AttributeInfo>> {
    let count = reader.u16()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = reader.u16()?;
        let length = reader.u32()? as usize;
        attributes.push(AttributeInfo {
            name_index,
            info: reader.take(length)?.to_vec(),
        });
    }
    Ok(attributes)
}

fn write_member(
    out: &mut Vec<u8>,
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: &[AttributeInfo],
) {
    out.extend_from_slice(&access.to_be_bytes());
    out.extend_from_slice(&name_index.to_be_bytes());
    out.extend_from_slice(&descriptor_index.to_be_bytes());
    write_attributes(out, attributes);
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[AttributeInfo]) {
    out.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
    for attribute in attributes {
        out.extend_from_slice(&attribute.name_index.to_be_bytes());
        out.extend_from_slice(&(attribute.info.len() as u32).to_be_bytes());
        out.extend_from_slice(&attribute.info);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, position: 0 }
    }

    fn at_end(&self) -> bool {
        self.position == self.bytes.len()
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8]> {
        let slice = self
            .bytes
            .get(self.position..self.position + length)
            .with_context(|| format!("truncated class file at offset {}", self.position))?;
        self.position += length;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }
}
