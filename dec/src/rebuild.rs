// rebuild.rs - post-lifting reconstruction: lifts every internal routine
// and, for module binaries, re-parents them under a synthetic class-like
// item. Scripts carry a single bare `main` and need no aggregation.

use std::collections::HashMap;

use log::{debug, warn};

use movedis::{CompiledUnit, UnitKind};

use crate::lift::{lift_function, LiftError, RoutineIr};
use crate::opt;
use crate::types::{Prototype, TypeManager};

/// Name given to the synthetic class standing in for a rebuilt module.
pub const MODULE_CLASS_NAME: &str = "DecompiledModule";

/// A class-like aggregate grouping lifted routines.
#[derive(Debug)]
pub struct ClassItem {
    pub name: String,
    /// Indices into the owning [`DecompiledUnit`]'s routine list.
    pub methods: Vec<usize>,
}

/// Registry of class items. The reconstructor mutates it while holding
/// whatever lock the embedding host provides; the core takes plain `&mut`
/// access and is single-threaded.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<ClassItem>,
}

impl ClassRegistry {
    pub fn create_class(&mut self, name: &str) -> usize {
        self.classes.push(ClassItem {
            name: name.to_string(),
            methods: Vec::new(),
        });
        self.classes.len() - 1
    }

    pub fn add_method(&mut self, class: usize, routine: usize) {
        self.classes[class].methods.push(routine);
    }

    pub fn get(&self, class: usize) -> &ClassItem {
        &self.classes[class]
    }

    pub fn classes(&self) -> &[ClassItem] {
        &self.classes
    }
}

/// The decompiled view of a unit: every routine that lifted, the shared
/// type registry and prototypes, and the synthetic module class for
/// MODULE binaries.
#[derive(Debug)]
pub struct DecompiledUnit {
    pub kind: UnitKind,
    pub routines: Vec<RoutineIr>,
    pub types: TypeManager,
    pub prototypes: HashMap<String, Prototype>,
    pub classes: ClassRegistry,
    /// The rebuilt module's class, absent for scripts.
    pub module_class: Option<usize>,
    /// Routines that failed to lift, with the error that stopped them.
    pub failures: Vec<(String, LiftError)>,
}

/// Lift every internal routine of the unit, run the optimizer hooks, and
/// rebuild the module aggregate when the binary is a module.
///
/// A routine that fails to lift is recorded and skipped; the rest of the
/// unit is still decompiled.
pub fn rebuild(unit: &CompiledUnit) -> DecompiledUnit {
    let mut types = TypeManager::new();
    let mut prototypes = HashMap::new();
    let mut routines = Vec::new();
    let mut failures = Vec::new();

    for func in unit.internal_functions() {
        let name = unit.function_name(func.function_handle_index);
        match lift_function(unit, &mut types, &mut prototypes, func) {
            Ok(mut routine) => {
                opt::sweep_dead_stores(&mut routine);
                opt::apply_additional_types(&mut routine, &types);
                routines.push(routine);
            }
            Err(e) => {
                warn!("routine {name} not lifted: {e}");
                failures.push((name, e));
            }
        }
    }

    let mut classes = ClassRegistry::default();
    let module_class = match unit.kind() {
        UnitKind::Script => None,
        UnitKind::Module => {
            let class = classes.create_class(MODULE_CLASS_NAME);
            for i in 0..routines.len() {
                classes.add_method(class, i);
            }
            debug!(
                "rebuilt module class {MODULE_CLASS_NAME} with {} methods",
                routines.len()
            );
            Some(class)
        }
    };

    DecompiledUnit {
        kind: unit.kind(),
        routines,
        types,
        prototypes,
        classes,
        module_class,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{module_with_body, script_with_body};

    #[test]
    fn script_is_not_aggregated() {
        let unit = movedis::load(script_with_body(1, &[0x02])).unwrap();
        let dec = rebuild(&unit);
        assert_eq!(dec.kind, UnitKind::Script);
        assert_eq!(dec.routines.len(), 1);
        assert!(dec.module_class.is_none());
        assert!(dec.classes.classes().is_empty());
        assert!(dec.failures.is_empty());
    }

    #[test]
    fn module_routines_are_reparented() {
        let unit = movedis::load(module_with_body(1, &[0x02])).unwrap();
        let dec = rebuild(&unit);
        assert_eq!(dec.kind, UnitKind::Module);
        let class = dec.classes.get(dec.module_class.unwrap());
        assert_eq!(class.name, MODULE_CLASS_NAME);
        assert_eq!(class.methods, vec![0]);
        assert_eq!(dec.routines.len(), 1);
    }

    #[test]
    fn rebuilt_routines_carry_prototypes() {
        let unit = movedis::load(module_with_body(1, &[0x02])).unwrap();
        let dec = rebuild(&unit);
        let r = &dec.routines[0];
        assert!(r.prototype.params.is_empty());
        assert!(dec.prototypes.contains_key(&r.name));
    }
}
