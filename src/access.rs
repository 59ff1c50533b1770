use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::classfile::{
    ACC_FINAL, ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC, ClassFile, Const, VISIBILITY_MASK,
};
use crate::opcodes;

/// One parsed line of the access-transformer config.
///
/// A class rule has no member; a member rule targets a field when it carries
/// no descriptor and a method otherwise (`*` and `*()` are the field and
/// method wildcards).
#[derive(Clone, Debug)]
pub struct AccessRule {
    member: Option<String>,
    descriptor: Option<String>,
    wildcard: bool,
    visibility: u16,
    finality: Option<bool>,
}

impl AccessRule {
    /// Recompute access flags for this rule's target.
    ///
    /// Visibility only ever widens: private adopts any explicit target,
    /// default refuses private, protected additionally refuses "unchanged",
    /// public refuses everything below itself. Finality is forced either way
    /// when the rule says so and left alone otherwise.
    pub fn apply_to(&self, access: u16) -> u16 {
        let current = access & VISIBILITY_MASK;
        let target = self.visibility;
        let mut result = access & !VISIBILITY_MASK;
        result |= match current {
            ACC_PRIVATE => target,
            0 => {
                if target != ACC_PRIVATE {
                    target
                } else {
                    0
                }
            }
            ACC_PROTECTED => {
                if target != 0 && target != ACC_PRIVATE {
                    target
                } else {
                    ACC_PROTECTED
                }
            }
            ACC_PUBLIC => {
                if target != 0 && target != ACC_PRIVATE && target != ACC_PROTECTED {
                    target
                } else {
                    ACC_PUBLIC
                }
            }
            // Multiple visibility bits set; not a well-formed class, leave it.
            _ => current,
        };
        match self.finality {
            Some(true) => result | ACC_FINAL,
            Some(false) => result & !ACC_FINAL,
            None => result,
        }
    }

    fn is_class_rule(&self) -> bool {
        self.member.is_none()
    }

    fn matches_member(&self, name: &str) -> bool {
        self.wildcard || self.member.as_deref() == Some(name)
    }
}

/// Access transformer: widens visibility/finality of classes and members per
/// a rule table, and rewrites same-class `invokespecial` call sites for
/// methods that stop being private.
pub struct AccessTransformer {
    rules: HashMap<String, Vec<AccessRule>>,
}

impl AccessTransformer {
    /// Parse one or more config files. Malformed lines are fatal: a
    /// half-loaded rule table would silently mis-transform classes later.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<AccessTransformer> {
        let mut transformer = AccessTransformer {
            rules: HashMap::new(),
        };
        for path in paths {
            let path = path.as_ref();
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            transformer
                .parse_config(&content)
                .with_context(|| format!("invalid access config {}", path.display()))?;
        }
        Ok(transformer)
    }

    pub fn from_config(content: &str) -> Result<AccessTransformer> {
        let mut transformer = AccessTransformer {
            rules: HashMap::new(),
        };
        transformer.parse_config(content)?;
        Ok(transformer)
    }

    fn parse_config(&mut self, content: &str) -> Result<()> {
        for (number, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (class_name, rule) = parse_rule(line)
                .with_context(|| format!("invalid access transformer line {}: {raw}", number + 1))?;
            self.rules.entry(class_name).or_default().push(rule);
        }
        Ok(())
    }

    /// Rule count across all classes; used for reporting.
    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Transform hook. `transformed_name` is the dot-form (deobfuscated)
    /// name the rule table is keyed by. `None` bytes pass through, as does
    /// any class without matching rules (byte-for-byte, unparsed).
    pub fn transform(
        &self,
        _name: &str,
        transformed_name: &str,
        bytes: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let Some(rules) = self.rules.get(transformed_name) else {
            return Ok(Some(bytes));
        };

        let mut class = ClassFile::parse(&bytes)
            .with_context(|| format!("failed to parse class {transformed_name}"))?;
        let mut overridable: Vec<(String, String)> = Vec::new();

        for rule in rules {
            if rule.is_class_rule() {
                class.access = rule.apply_to(class.access);
            } else if rule.descriptor.is_none() {
                self.apply_field_rule(&mut class, rule)?;
            } else {
                self.apply_method_rule(&mut class, rule, &mut overridable)?;
            }
        }

        if !overridable.is_empty() {
            rewrite_direct_calls(&mut class, &overridable)?;
        }

        Ok(Some(class.serialize()))
    }

    fn apply_field_rule(&self, class: &mut ClassFile, rule: &AccessRule) -> Result<()> {
        for index in 0..class.fields.len() {
            let name = class.utf8(class.fields[index].name_index)?.to_string();
            if rule.matches_member(&name) {
                class.fields[index].access = rule.apply_to(class.fields[index].access);
                if !rule.wildcard {
                    break;
                }
            }
        }
        Ok(())
    }

    fn apply_method_rule(
        &self,
        class: &mut ClassFile,
        rule: &AccessRule,
        overridable: &mut Vec<(String, String)>,
    ) -> Result<()> {
        for index in 0..class.methods.len() {
            let name = class.utf8(class.methods[index].name_index)?.to_string();
            let descriptor = class.utf8(class.methods[index].descriptor_index)?.to_string();
            let matches = rule.wildcard
                || (rule.member.as_deref() == Some(name.as_str())
                    && rule.descriptor.as_deref() == Some(descriptor.as_str()));
            if !matches {
                continue;
            }

            let was_private = class.methods[index].access & ACC_PRIVATE != 0;
            class.methods[index].access = rule.apply_to(class.methods[index].access);

            // Constructors always use invokespecial; for anything else that
            // just stopped being private, direct calls in this class must
            // become virtual so that subclass overrides are honored.
            if name != "<init>"
                && was_private
                && class.methods[index].access & ACC_PRIVATE == 0
            {
                overridable.push((name, descriptor));
            }

            if !rule.wildcard {
                break;
            }
        }
        Ok(())
    }
}

/// Rewrite every `invokespecial` in the class that targets one of the
/// now-overridable name+descriptor pairs to `invokevirtual`. All methods are
/// scanned: the target was private, so every call site lives in this class.
fn rewrite_direct_calls(class: &mut ClassFile, overridable: &[(String, String)]) -> Result<()> {
    for method_index in 0..class.methods.len() {
        for attribute_index in 0..class.methods[method_index].attributes.len() {
            if !class.is_code_attribute(&class.methods[method_index].attributes[attribute_index]) {
                continue;
            }
            let patches = {
                let info = &class.methods[method_index].attributes[attribute_index].info;
                direct_call_sites(class, info, overridable)?
            };
            let info = &mut class.methods[method_index].attributes[attribute_index].info;
            for offset in patches {
                info[offset] = opcodes::INVOKEVIRTUAL;
            }
        }
    }
    Ok(())
}

/// Offsets (into the Code attribute payload) of `invokespecial` opcodes
/// whose target matches one of `targets` by name and descriptor.
fn direct_call_sites(
    class: &ClassFile,
    info: &[u8],
    targets: &[(String, String)],
) -> Result<Vec<usize>> {
    let code_length = opcodes::read_i32(info, 4)? as usize;
    let code = info
        .get(8..8 + code_length)
        .context("truncated Code attribute")?;

    let mut sites = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        if code[offset] == opcodes::INVOKESPECIAL {
            let index = opcodes::read_u16(code, offset + 1)?;
            if let Some((name, descriptor)) = method_ref_target(class, index)?
                && targets
                    .iter()
                    .any(|(n, d)| *n == name && *d == descriptor)
            {
                sites.push(8 + offset);
            }
        }
        offset += opcodes::length(code, offset)?;
    }
    Ok(sites)
}

fn method_ref_target(class: &ClassFile, index: u16) -> Result<Option<(String, String)>> {
    let name_and_type = match class.const_at(index)? {
        Const::MethodRef { name_and_type, .. } => *name_and_type,
        Const::InterfaceMethodRef { name_and_type, .. } => *name_and_type,
        _ => return Ok(None),
    };
    Ok(Some(class.name_and_type(name_and_type)?))
}

fn parse_rule(line: &str) -> Result<(String, AccessRule)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() > 3 {
        bail!("expected at most 3 tokens, found {}", parts.len());
    }
    if parts.len() < 2 {
        bail!("expected a modifier and a class name");
    }

    let mut member = None;
    let mut descriptor = None;
    if parts.len() == 3 {
        let token = parts[2];
        match token.find('(') {
            Some(position) => {
                let name = &token[..position];
                if name.is_empty() {
                    bail!("member name cannot be empty");
                }
                member = Some(name.to_string());
                descriptor = Some(token[position..].to_string());
            }
            None => member = Some(token.to_string()),
        }
    }

    let modifier = parts[0];
    let visibility = if modifier.starts_with("public") {
        ACC_PUBLIC
    } else if modifier.starts_with("protected") {
        ACC_PROTECTED
    } else if modifier.starts_with("private") {
        ACC_PRIVATE
    } else {
        0
    };
    let finality = if modifier.ends_with("+f") {
        Some(true)
    } else if modifier.ends_with("-f") {
        Some(false)
    } else {
        None
    };

    let wildcard = member.as_deref() == Some("*");
    let class_name = parts[1].replace('/', ".");
    Ok((
        class_name,
        AccessRule {
            member,
            descriptor,
            wildcard,
            visibility,
            finality,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::ACC_STATIC;
    use crate::opcodes::{ALOAD_0, INVOKESPECIAL, INVOKEVIRTUAL, RETURN};
    use crate::testutil::{ClassBuilder, code_of, operand};

    fn rule(visibility: u16, finality: Option<bool>) -> AccessRule {
        AccessRule {
            member: None,
            descriptor: None,
            wildcard: false,
            visibility,
            finality,
        }
    }

    #[test]
    fn private_adopts_any_target() {
        assert_eq!(ACC_PUBLIC, rule(ACC_PUBLIC, None).apply_to(ACC_PRIVATE));
        assert_eq!(ACC_PROTECTED, rule(ACC_PROTECTED, None).apply_to(ACC_PRIVATE));
        assert_eq!(0, rule(0, None).apply_to(ACC_PRIVATE));
    }

    #[test]
    fn default_refuses_private() {
        assert_eq!(ACC_PUBLIC, rule(ACC_PUBLIC, None).apply_to(0));
        assert_eq!(0, rule(ACC_PRIVATE, None).apply_to(0));
    }

    #[test]
    fn protected_only_widens() {
        assert_eq!(ACC_PUBLIC, rule(ACC_PUBLIC, None).apply_to(ACC_PROTECTED));
        assert_eq!(ACC_PROTECTED, rule(0, None).apply_to(ACC_PROTECTED));
        assert_eq!(ACC_PROTECTED, rule(ACC_PRIVATE, None).apply_to(ACC_PROTECTED));
    }

    #[test]
    fn public_never_narrows() {
        assert_eq!(ACC_PUBLIC, rule(ACC_PROTECTED, None).apply_to(ACC_PUBLIC));
        assert_eq!(ACC_PUBLIC, rule(ACC_PRIVATE, None).apply_to(ACC_PUBLIC));
        assert_eq!(ACC_PUBLIC, rule(0, None).apply_to(ACC_PUBLIC));
    }

    #[test]
    fn widening_is_idempotent() {
        let widen = rule(ACC_PUBLIC, Some(true));
        let once = widen.apply_to(ACC_PRIVATE | ACC_STATIC);
        assert_eq!(once, widen.apply_to(once));
    }

    #[test]
    fn finality_is_forced_both_ways() {
        assert_eq!(
            ACC_PUBLIC | ACC_FINAL,
            rule(0, Some(true)).apply_to(ACC_PUBLIC)
        );
        assert_eq!(
            ACC_PUBLIC,
            rule(0, Some(false)).apply_to(ACC_PUBLIC | ACC_FINAL)
        );
        assert_eq!(
            ACC_PUBLIC | ACC_FINAL,
            rule(0, None).apply_to(ACC_PUBLIC | ACC_FINAL)
        );
    }

    #[test]
    fn config_with_too_many_tokens_fails_construction() {
        let result = AccessTransformer::from_config("public net/example/Widget doThing (I)V extra");
        assert!(result.is_err());
    }

    #[test]
    fn config_with_descriptor_only_member_fails_construction() {
        let result = AccessTransformer::from_config("public net/example/Widget (I)V");
        assert!(result.is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let transformer = AccessTransformer::from_config(
            "# full line comment\n\npublic net/example/Widget field # trailing\n",
        )
        .expect("parse config");
        assert_eq!(1, transformer.rule_count());
    }

    #[test]
    fn none_bytes_pass_through() {
        let transformer = AccessTransformer::from_config("").expect("parse config");
        let result = transformer
            .transform("net.example.Widget", "net.example.Widget", None)
            .expect("transform");
        assert!(result.is_none());
    }

    #[test]
    fn unmatched_class_is_returned_byte_for_byte() {
        let transformer =
            AccessTransformer::from_config("public net/example/Other").expect("parse config");
        let bytes = ClassBuilder::new("net/example/Widget", "java/lang/Object")
            .build()
            .serialize();

        let result = transformer
            .transform("net.example.Widget", "net.example.Widget", Some(bytes.clone()))
            .expect("transform");

        assert_eq!(Some(bytes), result);
    }

    #[test]
    fn class_rule_widens_class_access() {
        let transformer =
            AccessTransformer::from_config("public net/example/Widget").expect("parse config");
        let mut builder = ClassBuilder::new("net/example/Widget", "java/lang/Object").build();
        builder.access = crate::classfile::ACC_SUPER;
        let bytes = builder.serialize();

        let result = transformer
            .transform("net.example.Widget", "net.example.Widget", Some(bytes))
            .expect("transform")
            .expect("bytes");

        let class = ClassFile::parse(&result).expect("parse output");
        assert_eq!(ACC_PUBLIC | crate::classfile::ACC_SUPER, class.access);
    }

    #[test]
    fn field_rule_matches_first_by_name_and_wildcard_matches_all() {
        let transformer = AccessTransformer::from_config(
            "public net/example/Widget count\nprotected net/example/Holder *\n",
        )
        .expect("parse config");

        let widget = ClassBuilder::new("net/example/Widget", "java/lang/Object")
            .field(ACC_PRIVATE, "count", "I")
            .field(ACC_PRIVATE, "other", "I")
            .build()
            .serialize();
        let output = transformer
            .transform("net.example.Widget", "net.example.Widget", Some(widget))
            .expect("transform")
            .expect("bytes");
        let class = ClassFile::parse(&output).expect("parse output");
        assert_eq!(ACC_PUBLIC, class.fields[0].access);
        assert_eq!(ACC_PRIVATE, class.fields[1].access);

        let holder = ClassBuilder::new("net/example/Holder", "java/lang/Object")
            .field(ACC_PRIVATE, "a", "I")
            .field(0, "b", "I")
            .build()
            .serialize();
        let output = transformer
            .transform("net.example.Holder", "net.example.Holder", Some(holder))
            .expect("transform")
            .expect("bytes");
        let class = ClassFile::parse(&output).expect("parse output");
        assert_eq!(ACC_PROTECTED, class.fields[0].access);
        assert_eq!(ACC_PROTECTED, class.fields[1].access);
    }

    /// Scenario from the config format docs: `public-f` on a private
    /// non-final method makes it public final and turns both direct call
    /// sites into virtual dispatch, leaving the constructor's super call
    /// alone.
    #[test]
    fn widened_private_method_rewrites_direct_calls() {
        let mut builder = ClassBuilder::new("net/example/Widget", "java/lang/Object");
        let target = builder.method_ref("net/example/Widget", "doThing", "(I)V");
        let super_init = builder.method_ref("java/lang/Object", "<init>", "()V");
        let [target_hi, target_lo] = operand(target);
        let [init_hi, init_lo] = operand(super_init);

        let caller_code = vec![
            ALOAD_0,
            INVOKESPECIAL,
            target_hi,
            target_lo,
            ALOAD_0,
            INVOKESPECIAL,
            target_hi,
            target_lo,
            RETURN,
        ];
        let init_code = vec![ALOAD_0, INVOKESPECIAL, init_hi, init_lo, RETURN];
        let bytes = builder
            .method(ACC_PRIVATE, "doThing", "(I)V", vec![RETURN])
            .method(ACC_PUBLIC, "caller", "()V", caller_code)
            .method(ACC_PUBLIC, "<init>", "()V", init_code)
            .build()
            .serialize();

        let transformer =
            AccessTransformer::from_config("public-f net/example/Widget doThing (I)V")
                .expect("parse config");
        let output = transformer
            .transform("net.example.Widget", "net.example.Widget", Some(bytes))
            .expect("transform")
            .expect("bytes");
        let class = ClassFile::parse(&output).expect("parse output");

        assert_eq!(ACC_PUBLIC | ACC_FINAL, class.methods[0].access);

        let caller = code_of(&class, "caller");
        assert_eq!(INVOKEVIRTUAL, caller[1]);
        assert_eq!(INVOKEVIRTUAL, caller[5]);

        let init = code_of(&class, "<init>");
        assert_eq!(INVOKESPECIAL, init[1]);
    }

    #[test]
    fn widened_constructor_keeps_direct_invocation() {
        let mut builder = ClassBuilder::new("net/example/Widget", "java/lang/Object");
        let own_init = builder.method_ref("net/example/Widget", "<init>", "(I)V");
        let [hi, lo] = operand(own_init);
        let factory_code = vec![ALOAD_0, INVOKESPECIAL, hi, lo, RETURN];
        let bytes = builder
            .method(ACC_PRIVATE, "<init>", "(I)V", vec![RETURN])
            .method(ACC_PUBLIC, "create", "()V", factory_code)
            .build()
            .serialize();

        let transformer = AccessTransformer::from_config("public net/example/Widget <init> (I)V")
            .expect("parse config");
        let output = transformer
            .transform("net.example.Widget", "net.example.Widget", Some(bytes))
            .expect("transform")
            .expect("bytes");
        let class = ClassFile::parse(&output).expect("parse output");

        assert_eq!(ACC_PUBLIC, class.methods[0].access);
        assert_eq!(INVOKESPECIAL, code_of(&class, "create")[1]);
    }

    #[test]
    fn method_wildcard_widens_every_method() {
        let bytes = ClassBuilder::new("net/example/Widget", "java/lang/Object")
            .method(ACC_PRIVATE, "first", "()V", vec![RETURN])
            .method(0, "second", "(I)I", vec![RETURN])
            .build()
            .serialize();

        let transformer =
            AccessTransformer::from_config("public net/example/Widget *()").expect("parse config");
        let output = transformer
            .transform("net.example.Widget", "net.example.Widget", Some(bytes))
            .expect("transform")
            .expect("bytes");
        let class = ClassFile::parse(&output).expect("parse output");

        assert_eq!(ACC_PUBLIC, class.methods[0].access);
        assert_eq!(ACC_PUBLIC, class.methods[1].access);
    }
}
