//! Conditional resigning policy.
//!
//! A policy is an ordered list of rules mapping a set of required public
//! keys to a set of private keys: if a manifest verifies under *every*
//! public key named on the left (joined with `&`), it is signed with every
//! private key named on the right (joined with `,`). Rules are applied in
//! declaration order and their effects accumulate.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::keystore::{commented_lines, KeyStore};
use crate::narinfo::NarInfo;
use crate::signing::{NamedPrivateKey, NamedPublicKey};

/// One uncompiled policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRule {
    /// `&`-joined names of public keys which must all verify.
    pub verify: String,
    /// `,`-joined names of private keys to sign with.
    pub sign: String,
}

/// A compiled rule holding resolved key material.
#[derive(Debug, Clone)]
struct Clause {
    required: Vec<NamedPublicKey>,
    signers: Vec<NamedPrivateKey>,
    replace_by_name: bool,
}

/// The outcome of running a resigner over one manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResignOutcome {
    /// At least one clause added or replaced a signature.
    Resigned,
    /// No clause changed the manifest.
    Unchanged,
}

/// A compiled, immutable resigning policy.
#[derive(Debug, Clone, Default)]
pub struct Resigner {
    clauses: Vec<Clause>,
}

impl Resigner {
    /// Compiles rules against the loaded keys.
    ///
    /// Every name on either side of a rule must resolve; unknown names
    /// are collected across all rules and reported together. Blank names
    /// on the `verify` side are always-true conjuncts and are dropped.
    pub fn compile(store: &KeyStore, rules: &[PolicyRule]) -> Result<Self> {
        let mut unknown = Vec::new();
        let mut clauses = Vec::new();

        for rule in rules {
            let mut required = Vec::new();
            for name in rule.verify.split('&') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let keys = store.select_publics(&[name]);
                if keys.is_empty() {
                    unknown.push(format!("public key {name}"));
                } else {
                    required.extend(keys);
                }
            }

            let mut signers = Vec::new();
            for name in rule.sign.split(',') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let keys = store.select_privates(&[name]);
                if keys.is_empty() {
                    unknown.push(format!("private key {name}"));
                } else {
                    signers.extend(keys);
                }
            }

            clauses.push(Clause {
                required,
                signers,
                replace_by_name: false,
            });
        }

        if !unknown.is_empty() {
            return Err(Error::PolicyUnknownKeys {
                names: unknown.join(", "),
            });
        }

        Ok(Self { clauses })
    }

    /// Builds the policy used when no rules were configured: a single
    /// clause with no conditions that re-signs with every loaded private
    /// key, replacing stale signatures under the same names.
    pub fn unconditional(store: &KeyStore) -> Self {
        Self {
            clauses: vec![Clause {
                required: Vec::new(),
                signers: store.privates(),
                replace_by_name: true,
            }],
        }
    }

    /// Runs every clause against the manifest, in order.
    ///
    /// On any signing error the manifest must be considered tainted and
    /// discarded by the caller; nothing is rolled back.
    pub fn apply(&self, info: &mut NarInfo) -> Result<ResignOutcome> {
        let mut changed = false;

        for clause in &self.clauses {
            let all_verified = clause.required.iter().all(|key| info.verify(key).0);
            if !all_verified {
                continue;
            }
            for key in &clause.signers {
                let (added, _) = if clause.replace_by_name {
                    info.sign_replace_by_name(key)?
                } else {
                    info.sign(key)?
                };
                changed = changed || added;
            }
        }

        Ok(if changed {
            ResignOutcome::Resigned
        } else {
            ResignOutcome::Unchanged
        })
    }

    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Parses a policy file: one `pubspec=privspec` rule per line, with the
/// same blank-line and `#` comment handling as key files.
pub fn parse_policy_file(text: &str) -> Result<Vec<PolicyRule>> {
    let mut rules = Vec::new();
    for line in commented_lines(text) {
        let (verify, sign) = line
            .split_once('=')
            .ok_or_else(|| Error::invalid_data(line.as_str()))?;
        rules.push(PolicyRule {
            verify: verify.trim().to_string(),
            sign: sign.trim().to_string(),
        });
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NARINFO: &str = "StorePath: /nix/store/58br4vk3q5akf4g8lx0pqzfhn47k3j8d-bash-5.2p37
URL: nar/1ncdraq4baqrdp773pmrpb6b3pngkym9278z1kg3qkxxj25s3mrw.nar.xz
Compression: xz
FileHash: sha256:1ncdraq4baqrdp773pmrpb6b3pngkym9278z1kg3qkxxj25s3mrw
FileSize: 445184
NarHash: sha256:07pyb1bl3q4ivh86vx6vjjivfsm1hqrwdfm5d2x8kk7qzysl5j4j
NarSize: 1654408
References: 58br4vk3q5akf4g8lx0pqzfhn47k3j8d-bash-5.2p37 rmy663w9p7xb202rcln4jjzmvivznmz8-glibc-2.40-66
Deriver: cfp8jh04f3jfdcjskw2p64ri3w6njndm-bash-5.2p37.drv
";

    fn rule(verify: &str, sign: &str) -> PolicyRule {
        PolicyRule {
            verify: verify.to_string(),
            sign: sign.to_string(),
        }
    }

    /// A manifest signed by the named generated keys, plus the store
    /// holding their public halves and the private signer `x`.
    fn fixture(signed_by: &[&str]) -> (NarInfo, KeyStore) {
        let mut info = NarInfo::decode(NARINFO).unwrap();
        let store = KeyStore::new();
        for name in signed_by {
            let key = NamedPrivateKey::generate(name).unwrap();
            info.sign(&key).unwrap();
            store.add_public(key.public_key());
        }
        store.add_private(NamedPrivateKey::generate("x").unwrap());
        (info, store)
    }

    #[test]
    fn test_conjunction_match_appends_one_signature() {
        let (mut info, store) = fixture(&["a", "b", "c"]);
        let resigner = Resigner::compile(&store, &[rule("a&b", "x")]).unwrap();

        let outcome = resigner.apply(&mut info).unwrap();
        assert_eq!(outcome, ResignOutcome::Resigned);
        assert_eq!(
            info.sigs.iter().filter(|s| s.key_name() == "x").count(),
            1
        );
    }

    #[test]
    fn test_missing_conjunct_skips_clause() {
        let (mut info, store) = fixture(&["a", "b", "c"]);
        store.add_public(NamedPrivateKey::generate("d").unwrap().public_key());
        let resigner = Resigner::compile(&store, &[rule("a&d", "x")]).unwrap();

        let before = info.encode();
        let outcome = resigner.apply(&mut info).unwrap();
        assert_eq!(outcome, ResignOutcome::Unchanged);
        assert_eq!(info.encode(), before);
    }

    #[test]
    fn test_clause_order_is_signature_order() {
        let (mut info, store) = fixture(&["a"]);
        store.add_private(NamedPrivateKey::generate("y").unwrap());
        let resigner =
            Resigner::compile(&store, &[rule("a", "x"), rule("a", "y")]).unwrap();

        resigner.apply(&mut info).unwrap();
        let names: Vec<&str> = info.sigs.iter().map(|s| s.key_name()).collect();
        let x_at = names.iter().position(|n| *n == "x").unwrap();
        let y_at = names.iter().position(|n| *n == "y").unwrap();
        assert!(x_at < y_at);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let (mut info, store) = fixture(&["a"]);
        let resigner = Resigner::compile(&store, &[rule("a", "x")]).unwrap();

        assert_eq!(resigner.apply(&mut info).unwrap(), ResignOutcome::Resigned);
        assert_eq!(resigner.apply(&mut info).unwrap(), ResignOutcome::Unchanged);
    }

    #[test]
    fn test_blank_conjuncts_are_always_true() {
        let (mut info, store) = fixture(&["a"]);
        let resigner = Resigner::compile(&store, &[rule("", "x")]).unwrap();

        assert_eq!(resigner.apply(&mut info).unwrap(), ResignOutcome::Resigned);
    }

    #[test]
    fn test_unknown_keys_accumulate() {
        let (_, store) = fixture(&["a"]);
        let err = Resigner::compile(
            &store,
            &[rule("a&missing-pub", "x"), rule("a", "missing-priv")],
        )
        .unwrap_err();

        match err {
            Error::PolicyUnknownKeys { names } => {
                assert!(names.contains("missing-pub"));
                assert!(names.contains("missing-priv"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unconditional_replaces_by_name() {
        let (mut info, store) = fixture(&[]);
        // plant a stale `x` signature
        info.sigs.push(
            "x:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=="
                .parse()
                .unwrap(),
        );

        let resigner = Resigner::unconditional(&store);
        assert_eq!(resigner.clause_count(), 1);
        assert_eq!(resigner.apply(&mut info).unwrap(), ResignOutcome::Resigned);

        let x_sigs: Vec<_> = info
            .sigs
            .iter()
            .filter(|s| s.key_name() == "x")
            .collect();
        assert_eq!(x_sigs.len(), 1);
        let (verified, _) = info.verify(&store.select_privates(&["x"])[0].public_key());
        assert!(verified);
    }

    #[test]
    fn test_policy_file_matches_inline_rules() {
        let text = "# resign mirror content\ncacheA&cacheB=mirror\n\ncacheC=mirror,backup # both\n";
        let rules = parse_policy_file(text).unwrap();
        assert_eq!(
            rules,
            vec![rule("cacheA&cacheB", "mirror"), rule("cacheC", "mirror,backup")]
        );
    }

    #[test]
    fn test_policy_file_rejects_bare_lines() {
        assert!(parse_policy_file("no separator here\n").is_err());
    }
}
