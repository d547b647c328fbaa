use rand::Rng;
use regex_syntax::hir::{Class, ClassUnicode, ClassUnicodeRange, Hir, HirKind};

/// Extra repetitions allowed past the minimum for unbounded quantifiers (`*`, `+`, `{n,}`).
pub const UNBOUNDED_REPEAT_LIMIT: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error(transparent)]
    Syntax(#[from] regex_syntax::Error),

    #[error(transparent)]
    Sampler(#[from] rand_regex::Error),
}

/// Synthesizes random strings matching a regular expression.
///
/// Classes that contain printable ASCII are sampled only from that subset, so `.` and
/// `\w` produce readable values while `[а-я]` still works. Anchors and word
/// boundaries are ignored.
#[derive(Debug, Clone)]
pub struct ValueGenerator {
    pattern: String,
    sampler: rand_regex::Regex,
}

impl ValueGenerator {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let hir = regex_syntax::ParserBuilder::new().build().parse(pattern)?;
        let sampler = rand_regex::Regex::with_hir(readable(hir), UNBOUNDED_REPEAT_LIMIT)?;
        Ok(Self {
            pattern: pattern.to_string(),
            sampler,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn generate<R: Rng>(&self, rng: &mut R) -> String {
        rng.sample::<String, _>(&self.sampler)
    }
}

/// Narrows classes to printable ASCII where they overlap it and drops look-arounds.
fn readable(hir: Hir) -> Hir {
    match hir.into_kind() {
        HirKind::Empty | HirKind::Look(_) => Hir::empty(),
        HirKind::Literal(lit) => Hir::literal(lit.0),
        HirKind::Class(Class::Unicode(class)) => {
            let mut printable = class.clone();
            printable.intersect(&ClassUnicode::new([ClassUnicodeRange::new(' ', '~')]));
            if printable.ranges().is_empty() {
                Hir::class(Class::Unicode(class))
            } else {
                Hir::class(Class::Unicode(printable))
            }
        }
        HirKind::Class(class) => Hir::class(class),
        HirKind::Repetition(mut rep) => {
            rep.sub = Box::new(readable(*rep.sub));
            Hir::repetition(rep)
        }
        HirKind::Capture(mut cap) => {
            cap.sub = Box::new(readable(*cap.sub));
            Hir::capture(cap)
        }
        HirKind::Concat(parts) => Hir::concat(parts.into_iter().map(readable).collect()),
        HirKind::Alternation(branches) => {
            Hir::alternation(branches.into_iter().map(readable).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn fixed_repetition_produces_exact_length() {
        let g = ValueGenerator::compile("[0-9]{9}").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let v = g.generate(&mut rng);
            assert_eq!(v.len(), 9);
            assert!(v.chars().all(|c| c.is_ascii_digit()), "{v}");
        }
    }

    #[test]
    fn unbounded_repetition_is_capped() {
        let g = ValueGenerator::compile("id-x+").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let v = g.generate(&mut rng);
            let xs = v.strip_prefix("id-").unwrap();
            assert!((1..=1 + UNBOUNDED_REPEAT_LIMIT as usize).contains(&xs.len()));
        }
    }

    #[test]
    fn alternation_picks_a_branch() {
        let g = ValueGenerator::compile("(buy|sell)-[A-Z]{2}").unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let v = g.generate(&mut rng);
            assert!(v.starts_with("buy-") || v.starts_with("sell-"), "{v}");
            assert_eq!(v.rsplit('-').next().map(str::len), Some(2));
        }
    }

    #[test]
    fn dot_samples_printable_ascii_and_cyrillic_classes_work() {
        let mut rng = StdRng::seed_from_u64(11);

        let dot = ValueGenerator::compile(".{32}").unwrap().generate(&mut rng);
        assert!(dot.chars().all(|c| (' '..='~').contains(&c)), "{dot}");

        let cyr = ValueGenerator::compile("[а-я]{4}").unwrap().generate(&mut rng);
        assert_eq!(cyr.chars().count(), 4);
        assert!(cyr.chars().all(|c| ('а'..='я').contains(&c)), "{cyr}");
    }

    #[test]
    fn same_seed_same_values() {
        let g = ValueGenerator::compile("[a-f0-9]{16}").unwrap();
        let a = g.generate(&mut StdRng::seed_from_u64(42));
        let b = g.generate(&mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn anchors_are_ignored() {
        let g = ValueGenerator::compile("^ord-[0-9]{3}$").unwrap();
        let v = g.generate(&mut StdRng::seed_from_u64(5));
        assert_eq!(v.len(), 7);
        assert!(v.starts_with("ord-"), "{v}");
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(matches!(
            ValueGenerator::compile("[a-"),
            Err(PatternError::Syntax(_))
        ));
    }
}
