use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-rule modifiers. The bit layout is also the store encoding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct RuleFlags: u32 {
        /// Credentials acquired for this rule may be shared session-wide.
        const SHARED                 = 1 << 0;
        /// A root caller satisfies the rule without a credential.
        const ALLOW_ROOT             = 1 << 1;
        /// The session owner satisfies the rule regardless of group.
        const SESSION_OWNER          = 1 << 2;
        /// Prompt for a user instead of checking the session owner only.
        const AUTHENTICATE_USER      = 1 << 3;
        /// Expose the collected password to the caller.
        const EXTRACT_PASSWORD       = 1 << 4;
        /// Callers entitled to the right bypass evaluation.
        const ENTITLED               = 1 << 5;
        /// Entitled callers whose base credential is in `group` bypass.
        const ENTITLED_AND_GROUP     = 1 << 6;
        /// Callers not signed by the platform authority are denied.
        const REQUIRE_APPLE_SIGNED   = 1 << 7;
        /// Like `ENTITLED_AND_GROUP`, keyed on the VPN entitlement.
        const VPN_ENTITLED_AND_GROUP = 1 << 8;
        const PASSWORD_ONLY          = 1 << 9;
    }
}

bitflags! {
    /// Flags a caller passes with an authorization request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AuthFlags: u32 {
        /// Acquire new credentials when the existing ones do not suffice.
        const EXTEND_RIGHTS       = 1 << 0;
        const INTERACTION_ALLOWED = 1 << 1;
        /// One right failing does not abort the batch.
        const PARTIAL_RIGHTS      = 1 << 2;
        /// Never commit acquired credentials.
        const DESTROY_RIGHTS      = 1 << 3;
        const PRE_AUTHORIZE       = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SessionAttributes: u32 {
        /// The owner authenticated at least once in this session.
        const HAS_AUTHENTICATED  = 1 << 0;
        /// The session can display prompts.
        const HAS_GRAPHIC_ACCESS = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct TokenFlags: u32 {
        /// Grants are recorded as right credentials instead of uid credentials.
        const LEAST_PRIVILEGED = 1 << 0;
        const SANDBOXED        = 1 << 1;
        /// The creating process is signed by the platform authority.
        const APPLE_SIGNED     = 1 << 2;
    }
}
