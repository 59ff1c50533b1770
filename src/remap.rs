use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result, bail};
use log::warn;

use crate::classfile::{AttributeInfo, ClassFile, ClassSummary, Const};
use crate::mappings::SrgRecord;
use crate::opcodes;

/// Where the remapper finds raw bytecode for classes it has not seen yet:
/// supertype discovery and field-descriptor resolution both read ancestors
/// on demand. The embedding host decides what "the classpath" means.
pub trait ClassBytesSource {
    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>>;
}

impl ClassBytesSource for HashMap<String, Vec<u8>> {
    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.get(internal_name).cloned()
    }
}

/// Deobfuscation remapper: rewrites class, field, and method references in
/// a class's constant pool to their mapped names, resolving inherited
/// members through lazily-built flattened symbol tables.
///
/// Lookups degrade to identity on a miss; only malformed bytecode is an
/// error. Caches are unsynchronized, hence the `&mut self` lookups: class
/// loading drives this serially, and an embedder that does not must wrap
/// the remapper in a lock.
pub struct DeobfuscationRemapper {
    classes: HashMap<String, String>,
    inverse_classes: HashMap<String, String>,
    raw_fields: HashMap<String, HashMap<String, String>>,
    raw_methods: HashMap<String, HashMap<String, String>>,
    fields: HashMap<String, HashMap<String, String>>,
    methods: HashMap<String, HashMap<String, String>>,
    failed_fields: HashSet<String>,
    failed_methods: HashSet<String>,
    field_descriptors: HashMap<String, HashMap<String, String>>,
    source: Box<dyn ClassBytesSource>,
    engine_namespace: Option<String>,
}

struct StaticFieldPatch {
    method: usize,
    attribute: usize,
    operand_offset: usize,
    owner: String,
    name: String,
    descriptor: String,
}

enum AnnotationSite {
    Class { attribute: usize },
    Field { field: usize, attribute: usize },
    Method { method: usize, attribute: usize },
}

struct AnnotationPatch {
    site: AnnotationSite,
    offset: usize,
    descriptor: String,
}

enum AnnotationKind {
    Annotations,
    ParameterAnnotations,
    Default,
}

impl DeobfuscationRemapper {
    /// Build the mapping tables. Field mappings are stored twice, keyed by
    /// `name:descriptor` (descriptor read from the owning class through
    /// `source`) and by the descriptor-less `name:` fallback, because SRG
    /// field lines carry no descriptor of their own.
    pub fn new(
        records: Vec<SrgRecord>,
        source: Box<dyn ClassBytesSource>,
        engine_namespace: Option<String>,
    ) -> DeobfuscationRemapper {
        let mut remapper = DeobfuscationRemapper {
            classes: HashMap::new(),
            inverse_classes: HashMap::new(),
            raw_fields: HashMap::new(),
            raw_methods: HashMap::new(),
            fields: HashMap::new(),
            methods: HashMap::new(),
            failed_fields: HashSet::new(),
            failed_methods: HashSet::new(),
            field_descriptors: HashMap::new(),
            source,
            engine_namespace,
        };

        for record in records {
            match record {
                SrgRecord::Class { old, new } => {
                    remapper.classes.insert(old.clone(), new.clone());
                    remapper.inverse_classes.insert(new, old);
                }
                SrgRecord::Field { owner, old, new } => {
                    let descriptor = remapper.field_type(&owner, &old);
                    let table = remapper.raw_fields.entry(owner).or_default();
                    if let Some(descriptor) = descriptor {
                        table.insert(field_key(&old, Some(&descriptor)), new.clone());
                    }
                    table.insert(field_key(&old, None), new);
                }
                SrgRecord::Method {
                    owner,
                    old,
                    descriptor,
                    new,
                } => {
                    remapper
                        .raw_methods
                        .entry(owner)
                        .or_default()
                        .insert(format!("{old}{descriptor}"), new);
                }
            }
        }

        remapper
    }

    /// Internal-form class name remap; identity when unmapped.
    pub fn map<'a>(&'a self, internal_name: &'a str) -> &'a str {
        self.classes
            .get(internal_name)
            .map(String::as_str)
            .unwrap_or(internal_name)
    }

    /// Inverse of `map`; identity when unmapped.
    pub fn unmap<'a>(&'a self, internal_name: &'a str) -> &'a str {
        self.inverse_classes
            .get(internal_name)
            .map(String::as_str)
            .unwrap_or(internal_name)
    }

    /// Dot-form variant of `map`, for loader-facing name translation.
    pub fn remap_class_name(&self, class_name: &str) -> String {
        let internal = class_name.replace('.', "/");
        self.map(&internal).replace('/', ".")
    }

    /// Dot-form variant of `unmap`.
    pub fn unmap_class_name(&self, class_name: &str) -> String {
        let internal = class_name.replace('.', "/");
        self.unmap(&internal).replace('/', ".")
    }

    /// Rewrite every `L<class>;` segment of a field or method descriptor.
    /// Slicing only ever happens at the ASCII `L` and `;` delimiters, so
    /// multi-byte characters in class names pass through intact.
    pub fn map_desc(&self, descriptor: &str) -> String {
        let mut out = String::with_capacity(descriptor.len());
        let mut rest = descriptor;
        while let Some(start) = rest.find('L') {
            out.push_str(&rest[..start]);
            match rest[start..].find(';') {
                Some(relative) => {
                    let end = start + relative;
                    out.push('L');
                    out.push_str(self.map(&rest[start + 1..end]));
                    out.push(';');
                    rest = &rest[end + 1..];
                }
                None => {
                    // Unterminated reference type; keep the tail as-is.
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Class-entry remap: plain internal names go through `map`, array
    /// descriptors through `map_desc`.
    pub fn map_type(&self, name: &str) -> String {
        if name.starts_with('[') {
            self.map_desc(name)
        } else {
            self.map(name).to_string()
        }
    }

    /// Field rename through `owner`'s flattened inheritance-merged table.
    /// Pass `None` for descriptor-less lookups.
    pub fn map_field_name(&mut self, owner: &str, name: &str, descriptor: Option<&str>) -> String {
        let key = field_key(name, descriptor);
        if let Some(table) = self.field_map(owner)
            && let Some(mapped) = table.get(&key)
        {
            return mapped.clone();
        }
        name.to_string()
    }

    /// Method rename; methods are keyed by name+descriptor since overloads
    /// map independently.
    pub fn map_method_name(&mut self, owner: &str, name: &str, descriptor: &str) -> String {
        let key = format!("{name}{descriptor}");
        if let Some(table) = self.method_map(owner)
            && let Some(mapped) = table.get(&key)
        {
            return mapped.clone();
        }
        name.to_string()
    }

    /// Transform hook: rewrite all symbolic references in `bytes`.
    /// `None` passes through. Instruction offsets never move, so frames and
    /// exception tables stay valid untouched.
    pub fn transform(
        &mut self,
        _name: &str,
        transformed_name: &str,
        bytes: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let mut class = ClassFile::parse(&bytes)
            .with_context(|| format!("failed to parse class {transformed_name}"))?;

        let this_name = class.this_class_name()?.to_string();
        let super_name = class.super_class_name()?.map(str::to_string);
        let interfaces = class.interface_names()?;
        self.create_super_maps(&this_name, super_name.as_deref(), &interfaces);

        // Plan every edit against the original pool, then apply: interning
        // appends entries, and planned indices must not shift underneath us.
        let mut class_renames: Vec<(u16, String)> = Vec::new();
        let mut ref_repoints: Vec<(u16, String, String)> = Vec::new();
        let mut method_type_repoints: Vec<(u16, String)> = Vec::new();
        let mut dynamic_repoints: Vec<(u16, String, String)> = Vec::new();

        for index in 1..class.pool.len() {
            match class.pool[index].clone() {
                Const::Class { name } => {
                    let value = class.utf8(name)?.to_string();
                    let mapped = self.map_type(&value);
                    if mapped != value {
                        class_renames.push((index as u16, mapped));
                    }
                }
                Const::FieldRef {
                    class: owner_index,
                    name_and_type,
                } => {
                    let owner = class.class_name(owner_index)?.to_string();
                    let (member, descriptor) = class.name_and_type(name_and_type)?;
                    let mapped_member = self.map_field_name(&owner, &member, Some(&descriptor));
                    let mapped_descriptor = self.map_desc(&descriptor);
                    if mapped_member != member || mapped_descriptor != descriptor {
                        ref_repoints.push((index as u16, mapped_member, mapped_descriptor));
                    }
                }
                Const::MethodRef {
                    class: owner_index,
                    name_and_type,
                }
                | Const::InterfaceMethodRef {
                    class: owner_index,
                    name_and_type,
                } => {
                    let owner = class.class_name(owner_index)?.to_string();
                    let (member, descriptor) = class.name_and_type(name_and_type)?;
                    let mapped_member = self.map_method_name(&owner, &member, &descriptor);
                    let mapped_descriptor = self.map_desc(&descriptor);
                    if mapped_member != member || mapped_descriptor != descriptor {
                        ref_repoints.push((index as u16, mapped_member, mapped_descriptor));
                    }
                }
                Const::MethodType { descriptor } => {
                    let value = class.utf8(descriptor)?.to_string();
                    let mapped = self.map_desc(&value);
                    if mapped != value {
                        method_type_repoints.push((index as u16, mapped));
                    }
                }
                Const::Dynamic { name_and_type, .. }
                | Const::InvokeDynamic { name_and_type, .. } => {
                    let (member, descriptor) = class.name_and_type(name_and_type)?;
                    let mapped = self.map_desc(&descriptor);
                    if mapped != descriptor {
                        dynamic_repoints.push((index as u16, member, mapped));
                    }
                }
                _ => {}
            }
        }

        // The class's own declared members rename through the same tables.
        let mut field_repoints: Vec<(usize, String, String)> = Vec::new();
        for (index, field) in class.fields.iter().enumerate() {
            let member = class.utf8(field.name_index)?.to_string();
            let descriptor = class.utf8(field.descriptor_index)?.to_string();
            field_repoints.push((index, member, descriptor));
        }
        let field_repoints: Vec<(usize, String, String)> = field_repoints
            .into_iter()
            .map(|(index, member, descriptor)| {
                let mapped_member = self.map_field_name(&this_name, &member, Some(&descriptor));
                let mapped_descriptor = self.map_desc(&descriptor);
                (index, mapped_member, mapped_descriptor)
            })
            .collect();

        let mut method_repoints: Vec<(usize, String, String)> = Vec::new();
        for (index, method) in class.methods.iter().enumerate() {
            let member = class.utf8(method.name_index)?.to_string();
            let descriptor = class.utf8(method.descriptor_index)?.to_string();
            method_repoints.push((index, member, descriptor));
        }
        let method_repoints: Vec<(usize, String, String)> = method_repoints
            .into_iter()
            .map(|(index, member, descriptor)| {
                let mapped_member = self.map_method_name(&this_name, &member, &descriptor);
                let mapped_descriptor = self.map_desc(&descriptor);
                (index, mapped_member, mapped_descriptor)
            })
            .collect();

        let static_patches = self.plan_static_field_patches(&class)?;
        let annotation_patches = self.plan_annotation_patches(&class)?;

        for (index, mapped) in class_renames {
            let utf8 = class.intern_utf8(&mapped);
            class.pool[index as usize] = Const::Class { name: utf8 };
        }
        for (index, member, descriptor) in ref_repoints {
            let name_and_type = class.intern_name_and_type(&member, &descriptor);
            match &mut class.pool[index as usize] {
                Const::FieldRef {
                    name_and_type: slot,
                    ..
                }
                | Const::MethodRef {
                    name_and_type: slot,
                    ..
                }
                | Const::InterfaceMethodRef {
                    name_and_type: slot,
                    ..
                } => *slot = name_and_type,
                _ => {}
            }
        }
        for (index, mapped) in method_type_repoints {
            let utf8 = class.intern_utf8(&mapped);
            if let Const::MethodType { descriptor } = &mut class.pool[index as usize] {
                *descriptor = utf8;
            }
        }
        for (index, member, descriptor) in dynamic_repoints {
            let name_and_type = class.intern_name_and_type(&member, &descriptor);
            match &mut class.pool[index as usize] {
                Const::Dynamic {
                    name_and_type: slot,
                    ..
                }
                | Const::InvokeDynamic {
                    name_and_type: slot,
                    ..
                } => *slot = name_and_type,
                _ => {}
            }
        }
        for (index, member, descriptor) in field_repoints {
            class.fields[index].name_index = class.intern_utf8(&member);
            class.fields[index].descriptor_index = class.intern_utf8(&descriptor);
        }
        for (index, member, descriptor) in method_repoints {
            class.methods[index].name_index = class.intern_utf8(&member);
            class.methods[index].descriptor_index = class.intern_utf8(&descriptor);
        }
        for patch in static_patches {
            let ref_index = class.intern_field_ref(&patch.owner, &patch.name, &patch.descriptor);
            let info = &mut class.methods[patch.method].attributes[patch.attribute].info;
            info[patch.operand_offset..patch.operand_offset + 2]
                .copy_from_slice(&ref_index.to_be_bytes());
        }
        for patch in annotation_patches {
            let utf8 = class.intern_utf8(&patch.descriptor);
            let info = match patch.site {
                AnnotationSite::Class { attribute } => &mut class.attributes[attribute].info,
                AnnotationSite::Field { field, attribute } => {
                    &mut class.fields[field].attributes[attribute].info
                }
                AnnotationSite::Method { method, attribute } => {
                    &mut class.methods[method].attributes[attribute].info
                }
            };
            info[patch.offset..patch.offset + 2].copy_from_slice(&utf8.to_be_bytes());
        }

        Ok(Some(class.serialize()))
    }

    /// Find `getstatic` instructions whose mapped owner and mapped
    /// descriptor both fall inside the engine namespace, and whose field's
    /// declared type at the referenced owner disagrees with the naive
    /// descriptor remap. A subclass may shadow an inherited static field
    /// with a narrower declared type; the call site's descriptor has to
    /// follow the statically-referenced owner, not the ancestor.
    fn plan_static_field_patches(&mut self, class: &ClassFile) -> Result<Vec<StaticFieldPatch>> {
        let Some(namespace) = self.engine_namespace.clone() else {
            return Ok(Vec::new());
        };
        let reference_prefix = format!("L{namespace}");
        let mut patches = Vec::new();

        for method_index in 0..class.methods.len() {
            for attribute_index in 0..class.methods[method_index].attributes.len() {
                let attribute = &class.methods[method_index].attributes[attribute_index];
                if !class.is_code_attribute(attribute) {
                    continue;
                }
                let info = attribute.info.clone();
                let code_length = opcodes::read_i32(&info, 4)? as usize;
                let code = info
                    .get(8..8 + code_length)
                    .context("truncated Code attribute")?;

                let mut offset = 0;
                while offset < code.len() {
                    if code[offset] == opcodes::GETSTATIC {
                        let ref_index = opcodes::read_u16(code, offset + 1)?;
                        if let Const::FieldRef {
                            class: owner_index,
                            name_and_type,
                        } = class.const_at(ref_index)?
                        {
                            let owner = class.class_name(*owner_index)?.to_string();
                            let (member, descriptor) = class.name_and_type(*name_and_type)?;
                            let mapped_owner = self.map(&owner).to_string();
                            let mapped_descriptor = self.map_desc(&descriptor);
                            if mapped_owner.starts_with(&namespace)
                                && mapped_descriptor.starts_with(&reference_prefix)
                            {
                                let mapped_member =
                                    self.map_field_name(&owner, &member, Some(&descriptor));
                                if let Some(declared) = self.static_field_type(
                                    &owner,
                                    &member,
                                    &mapped_owner,
                                    &mapped_member,
                                ) {
                                    let corrected = self.map_desc(&declared);
                                    if corrected != mapped_descriptor {
                                        patches.push(StaticFieldPatch {
                                            method: method_index,
                                            attribute: attribute_index,
                                            operand_offset: 8 + offset + 1,
                                            owner: mapped_owner,
                                            name: mapped_member,
                                            descriptor: corrected,
                                        });
                                    }
                                }
                            }
                        }
                    }
                    offset += opcodes::length(code, offset)?;
                }
            }
        }
        Ok(patches)
    }

    /// Annotation attributes reference their type descriptors as direct
    /// Utf8 pool indices rather than Class entries, so the pool pass above
    /// never sees them. Reflective annotation reads would otherwise keep
    /// obfuscated type names after a remap.
    fn plan_annotation_patches(&self, class: &ClassFile) -> Result<Vec<AnnotationPatch>> {
        let mut patches = Vec::new();
        for (attribute_index, attribute) in class.attributes.iter().enumerate() {
            for (offset, descriptor) in self.annotation_patches_for(class, attribute)? {
                patches.push(AnnotationPatch {
                    site: AnnotationSite::Class {
                        attribute: attribute_index,
                    },
                    offset,
                    descriptor,
                });
            }
        }
        for (field_index, field) in class.fields.iter().enumerate() {
            for (attribute_index, attribute) in field.attributes.iter().enumerate() {
                for (offset, descriptor) in self.annotation_patches_for(class, attribute)? {
                    patches.push(AnnotationPatch {
                        site: AnnotationSite::Field {
                            field: field_index,
                            attribute: attribute_index,
                        },
                        offset,
                        descriptor,
                    });
                }
            }
        }
        for (method_index, method) in class.methods.iter().enumerate() {
            for (attribute_index, attribute) in method.attributes.iter().enumerate() {
                for (offset, descriptor) in self.annotation_patches_for(class, attribute)? {
                    patches.push(AnnotationPatch {
                        site: AnnotationSite::Method {
                            method: method_index,
                            attribute: attribute_index,
                        },
                        offset,
                        descriptor,
                    });
                }
            }
        }
        Ok(patches)
    }

    fn annotation_patches_for(
        &self,
        class: &ClassFile,
        attribute: &AttributeInfo,
    ) -> Result<Vec<(usize, String)>> {
        let Some(kind) = annotation_kind(class, attribute) else {
            return Ok(Vec::new());
        };
        let mut patches = Vec::new();
        for offset in annotation_descriptor_slots(&kind, &attribute.info)? {
            let index = opcodes::read_u16(&attribute.info, offset)?;
            let value = class.utf8(index)?;
            let mapped = self.map_desc(value);
            if mapped != value {
                patches.push((offset, mapped));
            }
        }
        Ok(patches)
    }

    fn field_map(&mut self, owner: &str) -> Option<&HashMap<String, String>> {
        if !self.fields.contains_key(owner) && !self.failed_fields.contains(owner) {
            self.load_super_maps(owner);
            if !self.fields.contains_key(owner) {
                self.failed_fields.insert(owner.to_string());
            }
        }
        self.fields.get(owner)
    }

    fn method_map(&mut self, owner: &str) -> Option<&HashMap<String, String>> {
        if !self.methods.contains_key(owner) && !self.failed_methods.contains(owner) {
            self.load_super_maps(owner);
            if !self.methods.contains_key(owner) {
                self.failed_methods.insert(owner.to_string());
            }
        }
        self.methods.get(owner)
    }

    fn load_super_maps(&mut self, internal_name: &str) {
        let Some(bytes) = self.source.class_bytes(internal_name) else {
            return;
        };
        match ClassSummary::parse(&bytes) {
            Ok(summary) => {
                self.create_super_maps(internal_name, summary.super_name.as_deref(), &summary.interfaces);
            }
            Err(error) => warn!("failed to parse ancestor {internal_name}: {error:#}"),
        }
    }

    /// Build the flattened symbol tables for `internal_name`, post-order:
    /// every parent is resolved first, then parents merge in declaration
    /// order and the class's own raw mappings win over inherited ones.
    fn create_super_maps(
        &mut self,
        internal_name: &str,
        super_name: Option<&str>,
        interfaces: &[String],
    ) {
        let Some(super_name) = super_name.filter(|name| !name.is_empty()) else {
            return;
        };
        let mut parents = Vec::with_capacity(interfaces.len() + 1);
        parents.push(super_name.to_string());
        parents.extend(interfaces.iter().cloned());

        for parent in &parents {
            if !self.fields.contains_key(parent) {
                self.load_super_maps(parent);
            }
        }

        let mut fields = HashMap::new();
        let mut methods = HashMap::new();
        for parent in &parents {
            if let Some(inherited) = self.fields.get(parent) {
                fields.extend(inherited.clone());
            }
            if let Some(inherited) = self.methods.get(parent) {
                methods.extend(inherited.clone());
            }
        }
        if let Some(own) = self.raw_fields.get(internal_name) {
            fields.extend(own.clone());
        }
        if let Some(own) = self.raw_methods.get(internal_name) {
            methods.extend(own.clone());
        }

        self.fields.insert(internal_name.to_string(), fields);
        self.methods.insert(internal_name.to_string(), methods);
    }

    /// Descriptor of `name` as declared on `owner`, read from bytecode and
    /// memoized per owner.
    fn field_type(&mut self, owner: &str, name: &str) -> Option<String> {
        if let Some(descriptors) = self.field_descriptors.get(owner) {
            return descriptors.get(name).cloned();
        }
        let bytes = self.source.class_bytes(owner)?;
        let summary = match ClassSummary::parse(&bytes) {
            Ok(summary) => summary,
            Err(error) => {
                warn!("failed to parse {owner} while resolving field types: {error:#}");
                return None;
            }
        };
        let mut descriptors = HashMap::with_capacity(summary.field_descriptors.len());
        for (field, descriptor) in summary.field_descriptors {
            descriptors.insert(field, descriptor);
        }
        let result = descriptors.get(name).cloned();
        self.field_descriptors.insert(owner.to_string(), descriptors);
        result
    }

    /// Declared type of a (possibly shadowed) static field, cached against
    /// the mapped owner so later call sites on the mapped name resolve
    /// without re-reading bytecode.
    fn static_field_type(
        &mut self,
        old_type: &str,
        old_name: &str,
        new_type: &str,
        new_name: &str,
    ) -> Option<String> {
        let descriptor = self.field_type(old_type, old_name)?;
        if old_type != new_type {
            self.field_descriptors
                .entry(new_type.to_string())
                .or_default()
                .insert(new_name.to_string(), descriptor.clone());
        }
        Some(descriptor)
    }
}

fn annotation_kind(class: &ClassFile, attribute: &AttributeInfo) -> Option<AnnotationKind> {
    match class.utf8(attribute.name_index) {
        Ok("RuntimeVisibleAnnotations") | Ok("RuntimeInvisibleAnnotations") => {
            Some(AnnotationKind::Annotations)
        }
        Ok("RuntimeVisibleParameterAnnotations") | Ok("RuntimeInvisibleParameterAnnotations") => {
            Some(AnnotationKind::ParameterAnnotations)
        }
        Ok("AnnotationDefault") => Some(AnnotationKind::Default),
        _ => None,
    }
}

/// Offsets, within an annotation attribute payload, of the two-byte Utf8
/// indices holding type descriptors: each annotation's `type_index`, enum
/// elements' `type_name_index`, and class elements' `class_info_index`.
/// Repointing those indices never moves a payload offset.
fn annotation_descriptor_slots(kind: &AnnotationKind, info: &[u8]) -> Result<Vec<usize>> {
    let mut slots = Vec::new();
    match kind {
        AnnotationKind::Annotations => {
            let count = opcodes::read_u16(info, 0)? as usize;
            let mut position = 2;
            for _ in 0..count {
                position = walk_annotation(info, position, &mut slots)?;
            }
        }
        AnnotationKind::ParameterAnnotations => {
            let parameters = *info.first().context("truncated parameter annotations")? as usize;
            let mut position = 1;
            for _ in 0..parameters {
                let count = opcodes::read_u16(info, position)? as usize;
                position += 2;
                for _ in 0..count {
                    position = walk_annotation(info, position, &mut slots)?;
                }
            }
        }
        AnnotationKind::Default => {
            walk_element_value(info, 0, &mut slots)?;
        }
    }
    Ok(slots)
}

fn walk_annotation(info: &[u8], offset: usize, slots: &mut Vec<usize>) -> Result<usize> {
    slots.push(offset);
    let pairs = opcodes::read_u16(info, offset + 2)? as usize;
    let mut position = offset + 4;
    for _ in 0..pairs {
        // Two bytes of element_name_index, then the element value.
        position = walk_element_value(info, position + 2, slots)?;
    }
    Ok(position)
}

fn walk_element_value(info: &[u8], offset: usize, slots: &mut Vec<usize>) -> Result<usize> {
    let tag = *info.get(offset).context("truncated annotation element")?;
    let position = offset + 1;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => Ok(position + 2),
        b'e' => {
            slots.push(position);
            Ok(position + 4)
        }
        b'c' => {
            slots.push(position);
            Ok(position + 2)
        }
        b'@' => walk_annotation(info, position, slots),
        b'[' => {
            let count = opcodes::read_u16(info, position)? as usize;
            let mut position = position + 2;
            for _ in 0..count {
                position = walk_element_value(info, position, slots)?;
            }
            Ok(position)
        }
        other => bail!("unknown annotation element tag: {other}"),
    }
}

fn field_key(name: &str, descriptor: Option<&str>) -> String {
    match descriptor {
        Some(descriptor) => format!("{name}:{descriptor}"),
        None => format!("{name}:"),
    }
}
