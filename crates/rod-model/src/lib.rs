//! Summary of a rod project extracted from its property tree.

use std::collections::BTreeMap;

use rod_props::{Props, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSummary {
    pub rod_names: Vec<String>,
    pub explicit_nodes: usize,
    pub generated_elements: usize,
    pub explicit_elements: usize,
    pub elements_by_order: BTreeMap<usize, usize>,
    pub material_defs: usize,
    pub group_defs: usize,
    pub load_defs: usize,
    pub constraint_defs: usize,
    pub solver_mode: String,
    pub has_contact: bool,
    pub has_plasticity: bool,
    pub is_transient: bool,
}

impl ModelSummary {
    pub fn from_props(props: &Props) -> Self {
        let mut rod_names = Vec::new();
        let mut generated_elements = 0usize;
        let mut explicit_elements = 0usize;
        let mut elements_by_order = BTreeMap::<usize, usize>::new();

        if let Some(rods) = props.get_table("model.rods") {
            for (name, rod) in rods.iter() {
                rod_names.push(name.clone());
                let Some(rod) = rod.as_table() else {
                    continue;
                };
                let order = rod.get_f64("order").map_or(1, |o| o.max(1.0) as usize);
                let count = match rod.get("connectivity").and_then(Value::as_array) {
                    Some(rows) => {
                        explicit_elements += rows.len();
                        rows.len()
                    }
                    None => {
                        let n = rod.get_f64("elements").map_or(1, |n| n.max(0.0) as usize);
                        generated_elements += n;
                        n
                    }
                };
                *elements_by_order.entry(order).or_insert(0) += count;
            }
        }

        let explicit_nodes = props
            .get("model.nodes")
            .and_then(Value::as_array)
            .map_or(0, |rows| rows.len());

        let count_table = |path: &str| props.get_table(path).map_or(0, Props::len);

        let materials = props.get_table("model.materials");
        let has_plasticity = materials.is_some_and(|m| {
            m.iter().any(|(_, mat)| {
                mat.as_table()
                    .and_then(|t| t.get_str("plasticity.kind"))
                    .is_some_and(|kind| kind != "elastic")
            })
        });

        let solver_mode = normalized(props.get_str("solver.mode").unwrap_or("force"));
        let is_transient = solver_mode == "transient";
        let has_contact = props
            .get("model.contact.enabled")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| props.contains("model.contact"));

        Self {
            rod_names,
            explicit_nodes,
            generated_elements,
            explicit_elements,
            elements_by_order,
            material_defs: count_table("model.materials"),
            group_defs: count_table("model.groups"),
            load_defs: count_table("model.loads"),
            constraint_defs: count_table("model.constraints"),
            solver_mode,
            has_contact,
            has_plasticity,
            is_transient,
        }
    }

    pub fn total_elements(&self) -> usize {
        self.generated_elements + self.explicit_elements
    }
}

fn normalized(mode: &str) -> String {
    mode.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase()
}
