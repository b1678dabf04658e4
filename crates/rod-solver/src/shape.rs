//! One-dimensional Lagrange shape functions and Gauss rules on `[-1, 1]`.
//!
//! Element nodes are numbered along the rod: node 0 sits at `xi = -1`, the
//! last node at `xi = +1` and interior nodes are equally spaced in between.

/// Shape function values and derivatives with respect to `xi`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeValues {
    pub n: Vec<f64>,
    pub dn: Vec<f64>,
    pub d2n: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LagrangeLine {
    nodes: Vec<f64>,
}

impl LagrangeLine {
    /// Shapes for `node_count` equally spaced nodes (2 to 4).
    pub fn new(node_count: usize) -> Option<Self> {
        if !(2..=4).contains(&node_count) {
            return None;
        }
        let step = 2.0 / (node_count - 1) as f64;
        Some(Self {
            nodes: (0..node_count).map(|i| -1.0 + step * i as f64).collect(),
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Natural coordinate of local node `i`.
    pub fn node_coordinate(&self, i: usize) -> f64 {
        self.nodes[i]
    }

    pub fn eval(&self, xi: f64) -> ShapeValues {
        let count = self.nodes.len();
        let mut n = vec![0.0; count];
        let mut dn = vec![0.0; count];
        let mut d2n = vec![0.0; count];

        for i in 0..count {
            let xi_i = self.nodes[i];
            let others: Vec<f64> = (0..count).filter(|&j| j != i).map(|j| self.nodes[j]).collect();
            let denom: f64 = others.iter().map(|xj| xi_i - xj).product();

            n[i] = others.iter().map(|xj| xi - xj).product::<f64>() / denom;

            let mut first = 0.0;
            let mut second = 0.0;
            for a in 0..others.len() {
                let mut term = 1.0;
                for (b, xb) in others.iter().enumerate() {
                    if b != a {
                        term *= xi - xb;
                    }
                }
                first += term;
                for c in 0..others.len() {
                    if c == a {
                        continue;
                    }
                    let mut term = 1.0;
                    for (b, xb) in others.iter().enumerate() {
                        if b != a && b != c {
                            term *= xi - xb;
                        }
                    }
                    second += term;
                }
            }
            dn[i] = first / denom;
            d2n[i] = second / denom;
        }

        ShapeValues { n, dn, d2n }
    }
}

/// Gauss-Legendre points and weights with `count` points (1 to 4).
pub fn gauss_rule(count: usize) -> Option<Vec<(f64, f64)>> {
    let rule = match count {
        1 => vec![(0.0, 2.0)],
        2 => {
            let a = 1.0 / 3.0_f64.sqrt();
            vec![(-a, 1.0), (a, 1.0)]
        }
        3 => {
            let a = (3.0_f64 / 5.0).sqrt();
            vec![(-a, 5.0 / 9.0), (0.0, 8.0 / 9.0), (a, 5.0 / 9.0)]
        }
        4 => {
            let inner = (3.0 / 7.0 - 2.0 / 7.0 * (6.0_f64 / 5.0).sqrt()).sqrt();
            let outer = (3.0 / 7.0 + 2.0 / 7.0 * (6.0_f64 / 5.0).sqrt()).sqrt();
            let w_inner = (18.0 + 30.0_f64.sqrt()) / 36.0;
            let w_outer = (18.0 - 30.0_f64.sqrt()) / 36.0;
            vec![
                (-outer, w_outer),
                (-inner, w_inner),
                (inner, w_inner),
                (outer, w_outer),
            ]
        }
        _ => return None,
    };
    Some(rule)
}
