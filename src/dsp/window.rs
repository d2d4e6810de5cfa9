//! Window functions applied to analysis snapshots before the spectral transform.

use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowKind {
    /// Rectangular window; leaves samples untouched.
    #[default]
    None,
    Bartlett,
    Blackman,
    BlackmanExact,
    BlackmanHarris,
    BlackmanNuttall,
    FlatTop,
    Hann,
    Nuttall,
    Sine,
    Triangular,
    Welch,
}

/// Name lookup table. `resolve` binary-searches it, so entries must stay in
/// byte-wise lexicographic order; the const assertion below enforces that.
pub const WINDOW_TABLE: [(&str, WindowKind); 11] = [
    ("bartlett", WindowKind::Bartlett),
    ("blackman", WindowKind::Blackman),
    ("blackman_exact", WindowKind::BlackmanExact),
    ("blackman_harris", WindowKind::BlackmanHarris),
    ("blackman_nuttall", WindowKind::BlackmanNuttall),
    ("flat_top", WindowKind::FlatTop),
    ("hann", WindowKind::Hann),
    ("nuttall", WindowKind::Nuttall),
    ("sine", WindowKind::Sine),
    ("triangular", WindowKind::Triangular),
    ("welch", WindowKind::Welch),
];

const _: () = assert!(table_is_sorted(&WINDOW_TABLE), "WINDOW_TABLE must be sorted");

const fn str_less(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let mut i = 0;
    while i < a.len() && i < b.len() {
        if a[i] != b[i] {
            return a[i] < b[i];
        }
        i += 1;
    }
    a.len() < b.len()
}

const fn table_is_sorted(table: &[(&str, WindowKind)]) -> bool {
    let mut i = 1;
    while i < table.len() {
        if !str_less(table[i - 1].0, table[i].0) {
            return false;
        }
        i += 1;
    }
    true
}

const BLACKMAN: [f64; 3] = [0.42, 0.5, 0.08];
const BLACKMAN_EXACT: [f64; 3] = [7938.0 / 18608.0, 9240.0 / 18608.0, 1430.0 / 18608.0];
const BLACKMAN_HARRIS: [f64; 4] = [0.35875, 0.48829, 0.14128, 0.01168];
const BLACKMAN_NUTTALL: [f64; 4] = [0.3635819, 0.4891775, 0.1365995, 0.0106411];
const NUTTALL: [f64; 4] = [0.355768, 0.487396, 0.144232, 0.012604];
const FLAT_TOP: [f64; 5] = [1.0, 1.93, 1.29, 0.388, 0.028];

impl WindowKind {
    /// Look up a window by its table name. Unknown, differently cased or
    /// missing names resolve to [`WindowKind::None`].
    pub fn resolve(name: Option<&str>) -> Self {
        let Some(name) = name else {
            return WindowKind::None;
        };
        WINDOW_TABLE
            .binary_search_by(|(entry, _)| entry.cmp(&name))
            .map(|idx| WINDOW_TABLE[idx].1)
            .unwrap_or(WindowKind::None)
    }

    pub fn name(self) -> &'static str {
        WINDOW_TABLE
            .iter()
            .find(|(_, kind)| *kind == self)
            .map_or("none", |(name, _)| *name)
    }

    /// Multiply `samples` in place by this window's envelope.
    pub fn apply(self, samples: &mut [f32]) {
        let len = samples.len();
        if self == WindowKind::None || len < 2 {
            return;
        }
        for (n, sample) in samples.iter_mut().enumerate() {
            *sample *= self.coefficient(n, len) as f32;
        }
    }

    pub fn coefficients(self, len: usize) -> Vec<f32> {
        let mut window = vec![1.0; len];
        self.apply(&mut window);
        window
    }

    fn coefficient(self, n: usize, len: usize) -> f64 {
        let n = n as f64;
        let l = len as f64;
        let half_span = (l - 1.0) / 2.0;
        match self {
            WindowKind::None => 1.0,
            WindowKind::Triangular => 1.0 - ((n - half_span) / (l / 2.0)).abs(),
            WindowKind::Bartlett => 1.0 - ((n - half_span) / half_span).abs(),
            WindowKind::Welch => 1.0 - ((n - half_span) / half_span).powi(2),
            WindowKind::Hann => 0.5 - 0.5 * (2.0 * PI * n / (l - 1.0)).cos(),
            WindowKind::Sine => (PI * n / (l - 1.0)).sin(),
            WindowKind::Blackman => cosine_sum(&BLACKMAN, n, l),
            WindowKind::BlackmanExact => cosine_sum(&BLACKMAN_EXACT, n, l),
            WindowKind::BlackmanHarris => cosine_sum(&BLACKMAN_HARRIS, n, l),
            WindowKind::BlackmanNuttall => cosine_sum(&BLACKMAN_NUTTALL, n, l),
            WindowKind::Nuttall => cosine_sum(&NUTTALL, n, l),
            WindowKind::FlatTop => cosine_sum(&FLAT_TOP, n, l),
        }
    }
}

// a0 - a1 cos(2πn/(L-1)) + a2 cos(4πn/(L-1)) - a3 cos(6πn/(L-1)) + ...
fn cosine_sum(coeffs: &[f64], n: f64, len: f64) -> f64 {
    let phase = 2.0 * PI * n / (len - 1.0);
    coeffs
        .iter()
        .enumerate()
        .map(|(k, a)| {
            let term = a * (k as f64 * phase).cos();
            if k % 2 == 0 { term } else { -term }
        })
        .sum()
}
