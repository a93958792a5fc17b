use shared::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    UploadImages,
    RunDetection,
    GenerateReports,
    ViewAllRecords,
    ManageUsers,
}

const ADMIN: &[Capability] = &[
    Capability::UploadImages,
    Capability::RunDetection,
    Capability::GenerateReports,
    Capability::ViewAllRecords,
    Capability::ManageUsers,
];

const CLINICIAN: &[Capability] = &[
    Capability::UploadImages,
    Capability::RunDetection,
    Capability::GenerateReports,
];

const STUDENT: &[Capability] = &[Capability::UploadImages, Capability::RunDetection];

fn capabilities(role: Role) -> &'static [Capability] {
    match role {
        Role::Admin => ADMIN,
        Role::Doctor | Role::Researcher => CLINICIAN,
        Role::Student => STUDENT,
    }
}

/// The single permission check used by every handler.
pub fn allows(role: Role, capability: Capability) -> bool {
    capabilities(role).contains(&capability)
}
