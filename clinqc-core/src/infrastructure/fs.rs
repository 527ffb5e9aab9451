// clinqc-core/src/infrastructure/fs.rs
//
// Primitives fichier du moteur : écriture atomique de l'état QC et
// verrou inter-processus pour sérialiser les runs batch.

use crate::infrastructure::error::InfrastructureError;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Écrit `content` de façon atomique : les octets partent dans un fichier
/// temporaire du même répertoire, puis un rename le met en place. Un lecteur
/// voit l'ancien état ou le nouveau, jamais un fichier à moitié écrit.
pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
) -> Result<(), InfrastructureError> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    // Même répertoire que la cible, sinon persist() peut traverser un
    // filesystem et perdre l'atomicité du rename.
    let mut temp_file = tempfile::NamedTempFile::new_in(parent).map_err(InfrastructureError::Io)?;

    temp_file
        .write_all(content.as_ref())
        .map_err(InfrastructureError::Io)?;

    temp_file
        .persist(path)
        .map_err(|e| InfrastructureError::Io(e.error))?;

    Ok(())
}

/// Verrou de run inter-processus : un fichier pid créé avec `create_new`,
/// supprimé au drop. Deux processus ne peuvent pas exécuter un run QC sur
/// le même état en même temps. Un verrou orphelin (processus tué) doit être
/// supprimé à la main.
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Tente la prise du verrou. `Ok(None)` signifie qu'un autre run
    /// détient déjà le fichier.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Option<Self>, InfrastructureError> {
        let path = path.as_ref().to_path_buf();
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                // Le pid aide à diagnostiquer un verrou orphelin
                let _ = write!(file, "{}", std::process::id());
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(InfrastructureError::Io(e)),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
