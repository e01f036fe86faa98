//! User-facing notices.
//!
//! Redirects carry the notice code in the `x-security-notice` header; form
//! errors carry the text.

use serde::Serialize;

pub const NOTICE_HEADER: &str = "x-security-notice";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub code: &'static str,
    pub text: &'static str,
}

macro_rules! notices {
    ($($name:ident => $text:literal),* $(,)?) => {
        $(
            pub const $name: Notice = Notice {
                code: stringify!($name),
                text: $text,
            };
        )*
    };
}

notices! {
    UNAUTHORIZED => "You do not have permission to view this resource.",
    CONFIRM_REGISTRATION => "Thank you. Confirmation instructions have been sent.",
    EMAIL_CONFIRMED => "Thank you. Your email has been confirmed.",
    ALREADY_CONFIRMED => "Your email has already been confirmed.",
    INVALID_CONFIRMATION_TOKEN => "Invalid confirmation token.",
    CONFIRMATION_EXPIRED => "You did not confirm your email in time. New instructions have been sent.",
    CONFIRMATION_REQUEST => "Confirmation instructions have been sent.",
    CONFIRMATION_REQUIRED => "Email requires confirmation.",
    EMAIL_ALREADY_ASSOCIATED => "This email is already associated with an account.",
    PASSWORD_MISMATCH => "Password does not match.",
    RETYPE_PASSWORD_MISMATCH => "Passwords do not match.",
    PASSWORD_RESET_REQUEST => "Instructions to reset your password have been sent.",
    PASSWORD_RESET_EXPIRED => "You did not reset your password in time. New instructions have been sent.",
    INVALID_RESET_PASSWORD_TOKEN => "Invalid reset password token.",
    PASSWORD_RESET => "You successfully reset your password and you have been logged in automatically.",
    PASSWORD_IS_THE_SAME => "Your new password must be different than your previous password.",
    PASSWORD_CHANGE => "You successfully changed your password.",
    LOGIN => "Please log in to access this page.",
    LOGIN_EMAIL_SENT => "Instructions to login have been sent.",
    INVALID_LOGIN_TOKEN => "Invalid login token.",
    LOGIN_EXPIRED => "You did not login in time. New instructions have been sent.",
    PASSWORDLESS_LOGIN_SUCCESSFUL => "You have successfully logged in.",
    DISABLED_ACCOUNT => "Account is disabled.",
    EMAIL_NOT_PROVIDED => "Email not provided.",
    INVALID_EMAIL_ADDRESS => "Invalid email address.",
    PASSWORD_NOT_PROVIDED => "Password not provided.",
    PASSWORD_NOT_SET => "No password is set for this user.",
    INVALID_PASSWORD => "Invalid password.",
    USER_DOES_NOT_EXIST => "Specified user does not exist.",
    INVALID_REDIRECT => "Redirections outside the domain are forbidden.",
}
