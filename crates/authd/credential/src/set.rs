use crate::credential::Credential;

/// Insertion-ordered set of credentials.
///
/// Evaluation walks credentials in the order they were acquired, so this
/// keeps a vector rather than a hash set.
#[derive(Clone, Debug, Default)]
pub struct CredentialSet {
    items: Vec<Credential>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an equal credential is already present.
    pub fn insert(&mut self, credential: Credential) -> bool {
        if self.items.contains(&credential) {
            return false;
        }
        self.items.push(credential);
        true
    }

    /// Insert `credential`, swapping out an equal one in place. Returns the
    /// credential it replaced.
    pub fn replace(&mut self, credential: Credential) -> Option<Credential> {
        match self.items.iter().position(|c| *c == credential) {
            Some(index) => Some(std::mem::replace(&mut self.items[index], credential)),
            None => {
                self.items.push(credential);
                None
            }
        }
    }

    pub fn contains(&self, credential: &Credential) -> bool {
        self.items.contains(credential)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Credential> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn union(&mut self, other: &CredentialSet) {
        for credential in other.iter() {
            self.insert(credential.clone());
        }
    }

    pub fn invalidate_all(&self) {
        for credential in &self.items {
            credential.invalidate();
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<'a> IntoIterator for &'a CredentialSet {
    type Item = &'a Credential;
    type IntoIter = std::slice::Iter<'a, Credential>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Credential> for CredentialSet {
    fn from_iter<T: IntoIterator<Item = Credential>>(iter: T) -> Self {
        let mut set = CredentialSet::new();
        for credential in iter {
            set.insert(credential);
        }
        set
    }
}
