use std::collections::HashMap;
use std::sync::LazyLock;

const PRIMITIVES: &[(&str, &str)] = &[
    ("Boolean", "Z"),
    ("Char", "C"),
    ("Byte", "B"),
    ("Short", "S"),
    ("Int", "I"),
    ("Float", "F"),
    ("Long", "J"),
    ("Double", "D"),
];

static KOTLIN_TO_JVM: LazyLock<HashMap<String, String>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for (kotlin, jvm) in PRIMITIVES {
        map.insert(format!("kotlin/{kotlin}"), (*jvm).to_string());
        map.insert(format!("kotlin/{kotlin}Array"), format!("[{jvm}"));
    }
    map.insert("kotlin/Unit".to_string(), "V".to_string());

    let mut add = |kotlin: &str, jvm: &str| {
        map.insert(format!("kotlin/{kotlin}"), format!("L{jvm};"));
    };
    add("Any", "java/lang/Object");
    add("Nothing", "java/lang/Void");
    add("Annotation", "java/lang/annotation/Annotation");
    for class in ["String", "CharSequence", "Throwable", "Cloneable", "Number", "Comparable", "Enum"] {
        add(class, &format!("java/lang/{class}"));
    }
    for class in ["Iterator", "Collection", "List", "Set", "Map", "ListIterator"] {
        add(&format!("collections/{class}"), &format!("java/util/{class}"));
        add(&format!("collections/Mutable{class}"), &format!("java/util/{class}"));
    }
    add("collections/Iterable", "java/lang/Iterable");
    add("collections/MutableIterable", "java/lang/Iterable");
    add("collections/Map.Entry", "java/util/Map$Entry");
    add("collections/MutableMap.MutableEntry", "java/util/Map$Entry");
    for arity in 0..=22 {
        add(&format!("Function{arity}"), &format!("kotlin/jvm/functions/Function{arity}"));
        add(&format!("reflect/KFunction{arity}"), "kotlin/reflect/KFunction");
    }
    for class in ["Char", "Byte", "Short", "Int", "Float", "Long", "Double", "String", "Enum"] {
        add(&format!("{class}.Companion"), &format!("kotlin/jvm/internal/{class}CompanionObject"));
    }
    map
});

/// JVM descriptor for a Kotlin class id such as `kotlin/collections/Map.Entry`.
pub(crate) fn map_class(class_id: &str) -> String {
    KOTLIN_TO_JVM
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("L{};", class_id.replace('.', "$")))
}
