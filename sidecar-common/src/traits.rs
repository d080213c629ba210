use std::collections::BTreeMap;

use kube::Resource;

pub trait Named {
    fn name(&self) -> String;
}

pub trait MaybeNamespaced {
    fn namespace(&self) -> Option<String>;
}

pub trait Annotated {
    fn annotations(&self) -> Option<&BTreeMap<String, String>>;

    fn annotation(&self, annotation: &str) -> Option<&String> {
        self.annotations().and_then(|m| m.get(annotation))
    }
}

pub trait Labeled {
    fn labels(&self) -> Option<&BTreeMap<String, String>>;
}

pub trait ObjectRequest<O: Resource> {
    fn object(&self) -> Option<&O>;
}
