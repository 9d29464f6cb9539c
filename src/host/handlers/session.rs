//! Session identity handlers.

use crate::host::{AnalysisHost, HostIdentity};

pub fn host_identity(host: &dyn AnalysisHost) -> HostIdentity {
    HostIdentity {
        content_hash: host.content_hash().to_ascii_lowercase(),
        root_filename: host.root_filename(),
        input_file_path: host.input_file_path(),
    }
}
